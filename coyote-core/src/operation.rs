//! The scheduler's unit of work: a suspendable logical thread.
//!
//! An [`Operation`] is the handle user code (actors, raw tasks) holds to
//! talk to the scheduler. It never touches the scheduler's internal pick
//! logic directly — every method here is a thin wrapper around a message
//! sent to the control loop in [`crate::scheduler`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, OperationId};
use crate::scheduler::{PointKind, SchedulerHandle};

/// Where an operation stands relative to the scheduler's gate.
///
/// Invariant: at most one operation has an externally-observed status of
/// "running" at any instant — that isn't a variant here because
/// "running" isn't a status the scheduler stores, it's a transient fact
/// about which operation currently holds the baton (see
/// `scheduler::ControlLoop::current`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Eligible to be picked at the next scheduling point.
    Enabled,
    /// Waiting for an actor's inbox to become non-empty.
    BlockedOnReceive,
    /// Waiting for every operation in the set to reach `Completed`.
    BlockedOnJoin(Vec<OperationId>),
    /// Waiting on a virtual delay (a nondeterministic choice about
    /// whether the delay has "expired").
    BlockedOnDelay,
    /// Finished normally.
    Completed,
    /// Finished via `halt()` (or an unrecovered fault specific to this
    /// operation).
    Halted,
}

impl OperationStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, OperationStatus::Enabled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Halted)
    }
}

/// A handle to a scheduler-visible logical thread.
///
/// Cloning an `Operation` is cheap (it's a reference to the same
/// scheduler-owned record); clones refer to the same logical operation.
#[derive(Clone)]
pub struct Operation {
    id: OperationId,
    group: GroupId,
    creator: Option<OperationId>,
    scheduler: SchedulerHandle,
    suppress_count: Arc<AtomicI32>,
}

impl Operation {
    pub(crate) fn new(
        id: OperationId,
        group: GroupId,
        creator: Option<OperationId>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            id,
            group,
            creator,
            scheduler,
            suppress_count: Arc::new(AtomicI32::new(0)),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn creator(&self) -> Option<OperationId> {
        self.creator
    }

    /// A scheduling point with no other semantics: the scheduler may
    /// suspend the caller and resume another enabled operation.
    pub async fn schedule_next(&self) {
        self.scheduler
            .schedule_point(self.id, PointKind::Yield, self.suppressed())
            .await;
    }

    /// An explicit interleaving point, identical to `schedule_next` but
    /// named the way user code calls it when it wants to say "let other
    /// operations run here" without any other side effect.
    pub async fn interleave(&self) {
        self.schedule_next().await;
    }

    /// Scheduling point taken immediately before a cross-operation send.
    pub async fn before_send(&self) {
        self.scheduler
            .schedule_point(self.id, PointKind::Send, self.suppressed())
            .await;
    }

    /// Scheduling point taken immediately after a cross-operation send.
    pub async fn after_send(&self) {
        self.scheduler
            .schedule_point(self.id, PointKind::Send, self.suppressed())
            .await;
    }

    /// Scheduling point taken before dequeuing from an actor's inbox.
    pub async fn before_dequeue(&self) {
        self.scheduler
            .schedule_point(self.id, PointKind::Dequeue, self.suppressed())
            .await;
    }

    /// Mark self not-enabled and yield control until `predicate` holds.
    ///
    /// The predicate is re-checked every time the scheduler grants this
    /// operation the baton back (which only happens after whoever can
    /// make the predicate true reports a status change).
    pub async fn block_until<F>(&self, status_while_blocked: OperationStatus, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        while !predicate() {
            self.scheduler
                .set_status(self.id, status_while_blocked.clone())
                .await;
            self.scheduler
                .schedule_point(self.id, PointKind::Block, false)
                .await;
            self.scheduler.set_status(self.id, OperationStatus::Enabled).await;
        }
    }

    /// Block until every operation in `targets` has completed or halted.
    pub async fn join(&self, targets: HashSet<OperationId>) {
        let remaining = targets.into_iter().collect::<Vec<_>>();
        self.block_until(OperationStatus::BlockedOnJoin(remaining.clone()), || {
            remaining
                .iter()
                .all(|id| self.scheduler.is_terminal(*id))
        })
        .await;
    }

    /// A fair or unfair nondeterministic boolean choice, routed through
    /// the active strategy.
    pub async fn random_bool(&self, fair: bool) -> bool {
        self.scheduler
            .next_bool(self.id, fair, self.suppressed())
            .await
    }

    /// A nondeterministic integer choice in `0..limit`, routed through
    /// the active strategy.
    pub async fn random_int(&self, limit: u64) -> u64 {
        self.scheduler
            .next_int(self.id, limit, self.suppressed())
            .await
    }

    /// Suppress scheduler-initiated operation switches at ordinary
    /// scheduling points. The gate still switches away if this operation
    /// becomes not-enabled. Nestable; lifts at zero.
    pub fn suppress(&self) {
        self.suppress_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo one `suppress()`.
    pub fn resume(&self) {
        let prev = self.suppress_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "resume() without matching suppress()");
    }

    fn suppressed(&self) -> bool {
        self.suppress_count.load(Ordering::SeqCst) > 0
    }

    /// Terminal transition: finished normally.
    pub async fn complete(&self) {
        self.scheduler.terminate(self.id, OperationStatus::Completed).await;
    }

    /// Terminal transition: finished via halt.
    pub async fn halt(&self) {
        self.scheduler.terminate(self.id, OperationStatus::Halted).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_and_terminal_are_mutually_exclusive() {
        assert!(OperationStatus::Enabled.is_enabled());
        assert!(!OperationStatus::Enabled.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(!OperationStatus::Completed.is_enabled());
    }
}
