//! The bug report an [`crate::engine::Engine`] hands back for a failing
//! iteration: enough to print a human-readable diagnosis and, if a
//! trace was captured, to drive `coyote replay`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoyoteError;
use crate::trace::Trace;

/// One fault kind, named the way a user would grep a log for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BugKind {
    UsageError,
    UnhandledEvent,
    MustHandleViolation,
    AssertionFailure,
    LivenessViolation,
    Deadlock,
    UncontrolledConcurrency,
    ReplayMismatch,
}

impl BugKind {
    fn of(err: &CoyoteError) -> Option<Self> {
        match err {
            CoyoteError::UsageError { .. } => Some(BugKind::UsageError),
            CoyoteError::UnhandledEvent { .. } => Some(BugKind::UnhandledEvent),
            CoyoteError::MustHandleViolation { .. } => Some(BugKind::MustHandleViolation),
            CoyoteError::AssertionFailure { .. } => Some(BugKind::AssertionFailure),
            CoyoteError::LivenessViolation { .. } => Some(BugKind::LivenessViolation),
            CoyoteError::Deadlock { .. } => Some(BugKind::Deadlock),
            CoyoteError::UncontrolledConcurrency { .. } => Some(BugKind::UncontrolledConcurrency),
            CoyoteError::ReplayMismatch { .. } => Some(BugKind::ReplayMismatch),
            CoyoteError::Unfair { .. } | CoyoteError::TraceFormat(_) | CoyoteError::Io(_) => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            BugKind::UsageError => "usage_error",
            BugKind::UnhandledEvent => "unhandled_event",
            BugKind::MustHandleViolation => "must_handle_violation",
            BugKind::AssertionFailure => "assertion_failure",
            BugKind::LivenessViolation => "liveness_violation",
            BugKind::Deadlock => "deadlock",
            BugKind::UncontrolledConcurrency => "uncontrolled_concurrency",
            BugKind::ReplayMismatch => "replay_mismatch",
        }
    }
}

/// A single failing iteration's findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    pub iteration: usize,
    pub step: u64,
    pub kind: BugKind,
    pub message: String,
    /// Present whenever the failing schedule was captured; absent for
    /// faults detected before any operation registered (vanishingly
    /// rare, but the field stays optional rather than synthesizing an
    /// empty trace).
    pub trace_text: Option<String>,
}

impl BugReport {
    /// Build a report from a fault and the trace recorded up to that
    /// point, if any. Returns `None` for `Unfair` without a hot
    /// monitor and for non-bug parse/io errors — callers decide those
    /// cases separately (see `engine::Engine::run_iteration`).
    pub fn from_error(err: &CoyoteError, iteration: usize, trace: Option<&Trace>) -> Option<Self> {
        let kind = BugKind::of(err)?;
        let (step, message) = fault_fields(err);
        info!(
            target: "coyote::report",
            iteration,
            step,
            kind = kind.tag(),
            has_trace = trace.is_some(),
            "bug report: {message}"
        );
        Some(Self {
            iteration,
            step,
            kind,
            message,
            trace_text: trace.map(Trace::to_text),
        })
    }
}

fn fault_fields(err: &CoyoteError) -> (u64, String) {
    let step = match err {
        CoyoteError::UsageError { fault, .. }
        | CoyoteError::MustHandleViolation { fault, .. }
        | CoyoteError::AssertionFailure { fault, .. }
        | CoyoteError::LivenessViolation { fault, .. }
        | CoyoteError::Deadlock { fault, .. }
        | CoyoteError::UncontrolledConcurrency { fault, .. }
        | CoyoteError::ReplayMismatch { fault, .. }
        | CoyoteError::UnhandledEvent { fault, .. } => fault.step,
        CoyoteError::Unfair { steps } => *steps,
        CoyoteError::TraceFormat(_) | CoyoteError::Io(_) => 0,
    };
    (step, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;

    #[test]
    fn deadlock_becomes_a_report() {
        let err = CoyoteError::Deadlock {
            remaining: 2,
            fault: Fault::new(3, 17),
        };
        let report = BugReport::from_error(&err, 3, None).unwrap();
        assert_eq!(report.kind, BugKind::Deadlock);
        assert_eq!(report.step, 17);
        assert!(report.trace_text.is_none());
    }

    #[test]
    fn unfair_is_not_a_report_on_its_own() {
        let err = CoyoteError::Unfair { steps: 500 };
        assert!(BugReport::from_error(&err, 0, None).is_none());
    }
}
