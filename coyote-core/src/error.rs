//! Error taxonomy for the runtime.
//!
//! `CoyoteError` enumerates every fault kind in the specification's
//! failure table: a usage error in actor wiring, an event nobody handled,
//! a must-handle envelope that got dropped, a failed user assertion, a
//! liveness violation, a deadlock, an uncontrolled concurrency primitive,
//! or a replay divergence. Each variant carries enough context (iteration
//! and step index) to point a user at the offending schedule.

use thiserror::Error;

use crate::id::{ActorId, OperationId};

/// Convenience result type using [`CoyoteError`].
pub type Result<T> = std::result::Result<T, CoyoteError>;

/// Where in a run an error occurred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fault {
    /// Which test iteration (0-based) the fault occurred in.
    pub iteration: usize,
    /// The schedule step index at which the fault was detected.
    pub step: u64,
}

impl Fault {
    pub fn new(iteration: usize, step: u64) -> Self {
        Self { iteration, step }
    }
}

/// All fault kinds the runtime can report, per the specification's
/// error-handling design (§7).
#[derive(Error, Debug)]
pub enum CoyoteError {
    /// Violation of a state-machine wiring rule: a second raise/goto/push/pop
    /// in one handler body, a send after one of those, goto in `OnExit`,
    /// `pop` without a matching `push`, or a transition to an undeclared
    /// state.
    #[error("usage error at {fault:?}: {message}")]
    UsageError { message: String, fault: Fault },

    /// An envelope reached the head of an inbox with no action/goto/push
    /// mapping in the current state or any ancestor, and `OnEventUnhandled`
    /// returned normally.
    #[error("actor {actor} could not handle event '{event}' at {fault:?}")]
    UnhandledEvent {
        actor: ActorId,
        event: String,
        fault: Fault,
    },

    /// A must-handle envelope was dropped (matched the ignored set) or
    /// remained undequeued when the actor finished draining on halt.
    #[error("must-handle violation at {fault:?}: {message}")]
    MustHandleViolation { message: String, fault: Fault },

    /// A user `assert` failed.
    #[error("assertion failed at {fault:?}: {message}")]
    AssertionFailure { message: String, fault: Fault },

    /// A monitor was still hot at program end, or a hot monitor's
    /// temperature counter crossed `liveness_threshold`.
    #[error("liveness violation at {fault:?}: {message}")]
    LivenessViolation { message: String, fault: Fault },

    /// No enabled operations remained and none could unblock.
    #[error("deadlock at {fault:?}: {remaining} operation(s) blocked with nothing enabled")]
    Deadlock { remaining: usize, fault: Fault },

    /// An intercepted concurrency primitive returned a future/thread the
    /// scheduler does not control.
    #[error("uncontrolled concurrency at {fault:?}: {method}")]
    UncontrolledConcurrency { method: String, fault: Fault },

    /// A live decision diverged from the recorded trace during replay.
    #[error("replay mismatch at {fault:?}: expected {expected}, observed {observed}")]
    ReplayMismatch {
        expected: String,
        observed: String,
        fault: Fault,
    },

    /// The iteration used every available scheduling step without any of
    /// the above faults; reported separately because an unfair ending is
    /// not by itself a bug unless a hot monitor is live.
    #[error("iteration ended unfair after {steps} steps with operation(s) still enabled")]
    Unfair { steps: u64 },

    /// A schedule decision or trace line failed to parse.
    #[error("malformed trace: {0}")]
    TraceFormat(String),

    /// Wraps a `std::io::Error` encountered while reading/writing a trace
    /// file.
    #[error("trace io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoyoteError {
    /// The specific operation this error is about, when one applies.
    pub fn offending_operation(&self) -> Option<OperationId> {
        None
    }

    /// True for errors that should count the iteration as having found a
    /// bug (as opposed to [`CoyoteError::Unfair`], which only counts as a
    /// bug when paired with a live hot monitor — see `engine::Engine`).
    pub fn is_bug(&self) -> bool {
        !matches!(self, CoyoteError::Unfair { .. })
    }
}
