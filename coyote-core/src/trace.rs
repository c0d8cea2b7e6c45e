//! The replayable execution trace: every scheduling decision and every
//! nondeterministic choice, in strict step order, serializable to the
//! text format fixed by spec.md §6.
//!
//! Format:
//! ```text
//! schedule-version:1 strategy:<name> seed:<u64>
//! <step> <kind> <value> <hash>
//! ...
//! end <outcome>
//! ```

use std::fmt;

use crate::error::{CoyoteError, Result};
use crate::id::OperationId;

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionKind {
    Op(OperationId),
    Bool(bool),
    Int(u64),
}

impl DecisionKind {
    fn kind_word(&self) -> &'static str {
        match self {
            DecisionKind::Op(_) => "op",
            DecisionKind::Bool(_) => "bool",
            DecisionKind::Int(_) => "int",
        }
    }

    fn value_word(&self) -> String {
        match self {
            DecisionKind::Op(id) => id.raw().to_string(),
            DecisionKind::Bool(v) => v.to_string(),
            DecisionKind::Int(v) => v.to_string(),
        }
    }
}

/// A single line of the trace body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    pub step: u64,
    pub kind: DecisionKind,
    pub context_hash: u64,
}

/// Accumulates decisions during a live iteration.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    records: Vec<DecisionRecord>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub(crate) fn record(&mut self, kind: DecisionKind, context_hash: u64) {
        let step = self.records.len() as u64;
        self.records.push(DecisionRecord {
            step,
            kind,
            context_hash,
        });
    }

    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }
}

/// Final outcome tag written on a trace file's terminal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    NoBug,
    Bug(String),
}

impl fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceOutcome::NoBug => write!(f, "ok"),
            TraceOutcome::Bug(kind) => write!(f, "bug:{kind}"),
        }
    }
}

/// A complete, parsed trace: header plus body, ready either to be
/// serialized or to drive a [`crate::scheduler::strategies::replay::ReplayStrategy`].
#[derive(Debug, Clone)]
pub struct Trace {
    pub strategy: String,
    pub seed: u64,
    pub records: Vec<DecisionRecord>,
    pub outcome: TraceOutcome,
}

impl Trace {
    pub fn from_recorder(recorder: &TraceRecorder, strategy: &str, seed: u64, outcome: TraceOutcome) -> Self {
        Self {
            strategy: strategy.to_string(),
            seed,
            records: recorder.records().to_vec(),
            outcome,
        }
    }

    /// Serialize to the spec.md §6 text format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "schedule-version:1 strategy:{} seed:{}\n",
            self.strategy, self.seed
        ));
        for rec in &self.records {
            out.push_str(&format!(
                "{} {} {} {:x}\n",
                rec.step,
                rec.kind.kind_word(),
                rec.kind.value_word(),
                rec.context_hash
            ));
        }
        out.push_str(&format!("end {}\n", self.outcome));
        out
    }

    /// Parse the spec.md §6 text format.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| CoyoteError::TraceFormat("empty trace".into()))?;
        let (strategy, seed) = parse_header(header)?;

        let mut records = Vec::new();
        let mut outcome = None;
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("end ") {
                outcome = Some(if rest == "ok" {
                    TraceOutcome::NoBug
                } else if let Some(kind) = rest.strip_prefix("bug:") {
                    TraceOutcome::Bug(kind.to_string())
                } else {
                    return Err(CoyoteError::TraceFormat(format!("bad outcome line: {line}")));
                });
                continue;
            }
            records.push(parse_record(line)?);
        }

        let outcome = outcome
            .ok_or_else(|| CoyoteError::TraceFormat("trace missing terminal 'end' line".into()))?;

        Ok(Trace {
            strategy,
            seed,
            records,
            outcome,
        })
    }
}

fn parse_header(header: &str) -> Result<(String, u64)> {
    let mut strategy = None;
    let mut seed = None;
    for field in header.split_whitespace() {
        if let Some(rest) = field.strip_prefix("strategy:") {
            strategy = Some(rest.to_string());
        } else if let Some(rest) = field.strip_prefix("seed:") {
            seed = Some(
                rest.parse::<u64>()
                    .map_err(|_| CoyoteError::TraceFormat(format!("bad seed in header: {header}")))?,
            );
        }
    }
    let strategy = strategy.ok_or_else(|| CoyoteError::TraceFormat(format!("missing strategy in header: {header}")))?;
    let seed = seed.ok_or_else(|| CoyoteError::TraceFormat(format!("missing seed in header: {header}")))?;
    Ok((strategy, seed))
}

fn parse_record(line: &str) -> Result<DecisionRecord> {
    let mut parts = line.split_whitespace();
    let step = parts
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| CoyoteError::TraceFormat(format!("bad step in line: {line}")))?;
    let kind_word = parts
        .next()
        .ok_or_else(|| CoyoteError::TraceFormat(format!("missing kind in line: {line}")))?;
    let value_word = parts
        .next()
        .ok_or_else(|| CoyoteError::TraceFormat(format!("missing value in line: {line}")))?;
    let hash_word = parts
        .next()
        .ok_or_else(|| CoyoteError::TraceFormat(format!("missing hash in line: {line}")))?;
    let context_hash = u64::from_str_radix(hash_word, 16)
        .map_err(|_| CoyoteError::TraceFormat(format!("bad hash in line: {line}")))?;

    let kind = match kind_word {
        "op" => DecisionKind::Op(
            parse_op_id(value_word).ok_or_else(|| CoyoteError::TraceFormat(format!("bad op id in line: {line}")))?,
        ),
        "bool" => DecisionKind::Bool(
            value_word
                .parse::<bool>()
                .map_err(|_| CoyoteError::TraceFormat(format!("bad bool in line: {line}")))?,
        ),
        "int" => DecisionKind::Int(
            value_word
                .parse::<u64>()
                .map_err(|_| CoyoteError::TraceFormat(format!("bad int in line: {line}")))?,
        ),
        other => return Err(CoyoteError::TraceFormat(format!("unknown kind '{other}' in line: {line}"))),
    };

    Ok(DecisionRecord {
        step,
        kind,
        context_hash,
    })
}

/// Trace files store only the raw numeric id (operations are replayed
/// against a freshly re-run program, so the id need only match
/// positionally with what `OperationId::fresh()` will mint again in the
/// same order — see `strategies::replay`).
fn parse_op_id(raw: &str) -> Option<OperationId> {
    raw.parse::<u64>().ok().map(OperationId::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_text() {
        let mut rec = TraceRecorder::new();
        rec.record(DecisionKind::Op(OperationId::from_raw(1)), 0xabc);
        rec.record(DecisionKind::Bool(true), 0xdef);
        rec.record(DecisionKind::Int(3), 0x123);
        let trace = Trace::from_recorder(&rec, "random", 42, TraceOutcome::Bug("deadlock".into()));

        let text = trace.to_text();
        let parsed = Trace::parse(&text).unwrap();

        assert_eq!(parsed.strategy, "random");
        assert_eq!(parsed.seed, 42);
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.outcome, TraceOutcome::Bug("deadlock".into()));
    }

    #[test]
    fn rejects_missing_terminal_line() {
        let text = "schedule-version:1 strategy:random seed:1\n0 op 1 0\n";
        assert!(Trace::parse(text).is_err());
    }
}
