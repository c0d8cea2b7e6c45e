//! Deterministic replay: re-drives a previously recorded [`Trace`] rather
//! than making fresh choices. Used by `coyote replay <file>` to reproduce a
//! bug without re-exploring the schedule space.

use crate::id::OperationId;
use crate::scheduler::Strategy;
use crate::trace::{DecisionKind, Trace};

/// Forces each decision to match the next recorded one in sequence. If a
/// live decision's shape doesn't match what was recorded — a different
/// kind of point, or an operation that isn't in the recorded trace's
/// enabled set — the strategy flags [`ReplayStrategy::mismatched`] instead
/// of panicking; the engine turns that into a `ReplayMismatch` error.
pub struct ReplayStrategy {
    trace: Trace,
    cursor: usize,
    mismatch: Option<(String, String)>,
}

impl ReplayStrategy {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            cursor: 0,
            mismatch: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.trace.seed
    }

    /// Set once a recorded decision's kind doesn't match what the live run
    /// asked for. `(expected, observed)` description strings, suitable for
    /// embedding directly in a `CoyoteError::ReplayMismatch`.
    pub fn mismatched(&self) -> Option<&(String, String)> {
        self.mismatch.as_ref()
    }

    fn next_record(&mut self) -> Option<DecisionKind> {
        let record = self.trace.records.get(self.cursor)?.kind.clone();
        self.cursor += 1;
        Some(record)
    }

    fn flag(&mut self, expected: &str, observed: &str) {
        if self.mismatch.is_none() {
            self.mismatch = Some((expected.to_string(), observed.to_string()));
        }
    }
}

impl Strategy for ReplayStrategy {
    fn pick_next(&mut self, enabled: &[OperationId], _context: u64) -> OperationId {
        debug_assert!(!enabled.is_empty());
        match self.next_record() {
            Some(DecisionKind::Op(id)) => {
                if enabled.contains(&id) {
                    id
                } else {
                    self.flag(&format!("op {id}"), &format!("enabled set {enabled:?}"));
                    enabled[0]
                }
            }
            Some(other) => {
                self.flag("op", other_kind_word(&other));
                enabled[0]
            }
            None => {
                self.flag("op", "end of trace");
                enabled[0]
            }
        }
    }

    fn next_bool(&mut self, _fair: bool) -> bool {
        match self.next_record() {
            Some(DecisionKind::Bool(v)) => v,
            Some(other) => {
                self.flag("bool", other_kind_word(&other));
                false
            }
            None => {
                self.flag("bool", "end of trace");
                false
            }
        }
    }

    fn next_int(&mut self, limit: u64) -> u64 {
        if limit == 0 {
            return 0;
        }
        match self.next_record() {
            Some(DecisionKind::Int(v)) if v < limit => v,
            Some(DecisionKind::Int(v)) => {
                self.flag(&format!("int < {limit}"), &format!("int {v}"));
                0
            }
            Some(other) => {
                self.flag("int", other_kind_word(&other));
                0
            }
            None => {
                self.flag("int", "end of trace");
                0
            }
        }
    }

    fn on_iteration_start(&mut self, _seed: u64) {
        self.cursor = 0;
        self.mismatch = None;
    }

    fn on_iteration_end(&mut self, _bug_found: bool) {}

    fn name(&self) -> &'static str {
        "replay"
    }
}

fn other_kind_word(kind: &DecisionKind) -> &'static str {
    match kind {
        DecisionKind::Op(_) => "op",
        DecisionKind::Bool(_) => "bool",
        DecisionKind::Int(_) => "int",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{DecisionRecord, TraceOutcome};

    fn trace_of(kinds: Vec<DecisionKind>) -> Trace {
        Trace {
            strategy: "random".into(),
            seed: 0,
            records: kinds
                .into_iter()
                .enumerate()
                .map(|(i, kind)| DecisionRecord {
                    step: i as u64,
                    kind,
                    context_hash: 0,
                })
                .collect(),
            outcome: TraceOutcome::NoBug,
        }
    }

    #[test]
    fn replays_recorded_decisions_in_order() {
        let trace = trace_of(vec![DecisionKind::Bool(true), DecisionKind::Int(2)]);
        let mut s = ReplayStrategy::new(trace);
        assert!(s.next_bool(false));
        assert_eq!(s.next_int(5), 2);
        assert!(s.mismatched().is_none());
    }

    #[test]
    fn flags_kind_mismatch() {
        let trace = trace_of(vec![DecisionKind::Int(1)]);
        let mut s = ReplayStrategy::new(trace);
        let _ = s.next_bool(false);
        assert!(s.mismatched().is_some());
    }
}
