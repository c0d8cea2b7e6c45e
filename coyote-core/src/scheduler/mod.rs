//! The cooperative scheduler: a registry of operations, a single-slot gate,
//! and the strategy interface that decides who runs next.
//!
//! Internally this is a single [`ControlLoop`] guarded by a plain
//! [`std::sync::Mutex`]. Exactly one operation is ever "current" (holding
//! the baton); every other live operation is parked in `pending`, waiting
//! on its own [`tokio::sync::Notify`] for its turn. This mirrors the
//! single-threaded-cooperative model of §5 even though the operations
//! themselves are hosted as concurrently-pollable `tokio` tasks — the gate
//! is what serializes their user-visible progress, the same role the
//! teacher's Pregel barrier plays between supersteps.

pub mod strategies;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::id::{GroupId, OperationId};
use crate::operation::{Operation, OperationStatus};
use crate::trace::{DecisionKind, TraceRecorder};

/// Why an operation most recently reached a scheduling point. Distinct
/// `PointKind`s all funnel through the same gate, but `NextBool`/`NextInt`
/// additionally hand back a value chosen by the strategy.
#[derive(Debug, Clone)]
pub enum PointKind {
    Yield,
    Send,
    Dequeue,
    Block,
    NextBool { fair: bool },
    NextInt { limit: u64 },
}

/// What a parked operation is handed back once the strategy grants it the
/// baton.
#[derive(Debug, Clone, Copy)]
enum PointReply {
    Go,
    Bool(bool),
    Int(u64),
}

/// Terminal outcome of an iteration, as observed by the scheduler itself
/// (separate from user-level bugs like assertion failures, which never
/// reach the scheduler).
#[derive(Debug, Clone)]
pub enum FinishOutcome {
    /// Every operation reached `Completed`/`Halted`.
    Done,
    /// No enabled operation remained while at least one was still blocked.
    Deadlock { remaining: usize },
    /// `max_steps` scheduling decisions were made without the run ending.
    Unfair { steps: u64 },
}

/// Strategies implement this contract (spec.md §4.4). Calls happen inside
/// the scheduler's internal lock, so implementations must be synchronous
/// and fast.
pub trait Strategy: Send {
    /// Choose the next operation to run from the enabled set.
    /// `context` is a cheap structural hash of the current program state,
    /// available for priority/backtracking strategies that want it.
    fn pick_next(&mut self, enabled: &[OperationId], context: u64) -> OperationId;

    /// A nondeterministic boolean choice. `fair` choices are the ones the
    /// liveness checker may force to flip when a cycle is detected.
    fn next_bool(&mut self, fair: bool) -> bool;

    /// A nondeterministic integer choice in `0..limit` (`limit` is
    /// exclusive; `limit == 0` always yields `0`).
    fn next_int(&mut self, limit: u64) -> u64;

    /// Called once per iteration before any operation runs.
    fn on_iteration_start(&mut self, seed: u64);

    /// Called once per iteration after the run concludes, successfully or
    /// not.
    fn on_iteration_end(&mut self, bug_found: bool);

    /// Human-readable strategy name, embedded in trace file headers.
    fn name(&self) -> &'static str;

    /// Notified whenever the scheduler registers a new operation. Not
    /// part of the spec's four-method strategy contract, but needed for
    /// group-priority strategies (PCT) to learn operation → group
    /// membership without the core `pick_next` signature leaking
    /// scheduler internals to every strategy.
    fn on_operation_created(&mut self, _op: OperationId, _group: GroupId) {}
}

struct OpEntry {
    status: OperationStatus,
    group: GroupId,
    creator: Option<OperationId>,
    notify: Arc<Notify>,
    pending_reply: Option<PointReply>,
}

struct ControlLoop {
    operations: HashMap<OperationId, OpEntry>,
    /// Operations parked at a scheduling point, and why.
    pending: HashMap<OperationId, PointKind>,
    /// The operation currently holding the baton, if any.
    current: Option<OperationId>,
    /// `(op, suppressed)` for the operation that most recently parked;
    /// consulted once by the immediately following `try_advance`.
    last_parked: Option<(OperationId, bool)>,
    /// Shared rather than owned: the engine keeps its own clone across
    /// iterations so a strategy that accumulates state (`DfsStrategy`'s
    /// backtrack path) survives the fresh `ControlLoop` built for each
    /// iteration, with no ceremony for reclaiming it from the old one.
    strategy: Arc<Mutex<Box<dyn Strategy>>>,
    trace: TraceRecorder,
    step: u64,
    max_steps: u64,
    finish_tx: Option<oneshot::Sender<FinishOutcome>>,
    /// Set by the liveness checker when it detects a non-progressing
    /// cycle; consumed by the next fair `next_bool`, forcing it to the
    /// given value instead of asking the strategy, so the fairness
    /// property ("every fair choice eventually flips") has somewhere to
    /// come from even under a strategy that never would on its own.
    fairness_override: Option<bool>,
}

impl ControlLoop {
    fn try_advance(&mut self) {
        if self.current.is_some() {
            return;
        }
        if self.finish_tx.is_none() {
            // Already finished this iteration; nothing left to drive.
            return;
        }

        let suppressed_pick = self.last_parked.take().and_then(|(id, suppressed)| {
            let enabled = self
                .operations
                .get(&id)
                .map(|e| e.status.is_enabled())
                .unwrap_or(false);
            (suppressed && enabled && self.pending.contains_key(&id)).then_some(id)
        });

        let chosen = if let Some(id) = suppressed_pick {
            id
        } else {
            let mut enabled: Vec<OperationId> = self
                .pending
                .keys()
                .copied()
                .filter(|id| {
                    self.operations
                        .get(id)
                        .map(|e| e.status.is_enabled())
                        .unwrap_or(false)
                })
                .collect();
            enabled.sort_by_key(|id| id.raw());

            if enabled.is_empty() {
                let remaining = self
                    .operations
                    .values()
                    .filter(|e| !e.status.is_terminal())
                    .count();
                let outcome = if remaining == 0 {
                    debug!(target: "coyote::test", step = self.step, "iteration finished: every operation reached a terminal state");
                    FinishOutcome::Done
                } else {
                    warn!(target: "coyote::error", step = self.step, remaining, "no enabled operation remains while others are still blocked");
                    FinishOutcome::Deadlock { remaining }
                };
                if let Some(tx) = self.finish_tx.take() {
                    let _ = tx.send(outcome);
                }
                return;
            }

            let context = self.context_hash();
            self.strategy.lock().unwrap().pick_next(&enabled, context)
        };

        let kind = self.pending.remove(&chosen).expect("chosen op must be pending");
        self.step += 1;
        if self.step > self.max_steps {
            warn!(target: "coyote::error", steps = self.step - 1, max_steps = self.max_steps, "exceeded the configured step budget without finishing");
            if let Some(tx) = self.finish_tx.take() {
                let _ = tx.send(FinishOutcome::Unfair { steps: self.step - 1 });
            }
            // Put the operation back so a caller that already holds a
            // reference doesn't panic on a missing entry; it will simply
            // never be granted again this iteration.
            self.pending.insert(chosen, kind);
            return;
        }

        debug!(target: "coyote::test", step = self.step, operation = chosen.raw(), kind = ?kind, "scheduler granted the baton");

        let context = self.context_hash();
        let reply = match kind {
            PointKind::NextBool { fair } => {
                let value = if fair {
                    self.fairness_override
                        .take()
                        .unwrap_or_else(|| self.strategy.lock().unwrap().next_bool(fair))
                } else {
                    self.strategy.lock().unwrap().next_bool(fair)
                };
                self.trace.record(DecisionKind::Bool(value), context);
                PointReply::Bool(value)
            }
            PointKind::NextInt { limit } => {
                let value = self.strategy.lock().unwrap().next_int(limit);
                self.trace.record(DecisionKind::Int(value), context);
                PointReply::Int(value)
            }
            _ => {
                self.trace.record(DecisionKind::Op(chosen), context);
                PointReply::Go
            }
        };

        if let Some(entry) = self.operations.get_mut(&chosen) {
            entry.pending_reply = Some(reply);
            entry.notify.notify_one();
        }
        self.current = Some(chosen);
    }

    fn context_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ids: Vec<_> = self.operations.keys().map(|id| id.raw()).collect();
        ids.sort_unstable();
        let mut statuses: Vec<_> = self
            .operations
            .iter()
            .map(|(id, e)| (id.raw(), format!("{:?}", e.status)))
            .collect();
        statuses.sort();
        let mut hasher = DefaultHasher::new();
        self.step.hash(&mut hasher);
        ids.hash(&mut hasher);
        statuses.hash(&mut hasher);
        hasher.finish()
    }
}

/// A cheaply-cloneable reference to the scheduler, handed to every
/// [`Operation`] and to the actor dispatcher.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<ControlLoop>>,
}

impl SchedulerHandle {
    /// `strategy` is shared (an `Arc<Mutex<..>>`) rather than owned
    /// outright so the caller can keep its own clone across the
    /// iteration and feed the very same instance into the next
    /// iteration's fresh `SchedulerHandle` — see `engine::Engine`.
    pub(crate) fn new(
        strategy: Arc<Mutex<Box<dyn Strategy>>>,
        max_steps: u64,
        seed: u64,
        finish_tx: oneshot::Sender<FinishOutcome>,
    ) -> Self {
        strategy.lock().unwrap().on_iteration_start(seed);
        Self {
            inner: Arc::new(Mutex::new(ControlLoop {
                operations: HashMap::new(),
                pending: HashMap::new(),
                current: None,
                last_parked: None,
                strategy,
                trace: TraceRecorder::new(),
                step: 0,
                max_steps,
                finish_tx: Some(finish_tx),
                fairness_override: None,
            })),
        }
    }

    /// Force the next fair `next_bool` to return `value` rather than
    /// asking the strategy. Used by the liveness checker to break a
    /// detected cycle.
    pub(crate) fn force_next_fair_bool(&self, value: bool) {
        self.inner.lock().unwrap().fairness_override = Some(value);
    }

    /// Register a brand-new operation. Does not start running it — the
    /// caller must spawn a task whose first act is `schedule_point(id,
    /// Yield, ...)`.
    pub(crate) fn register(
        &self,
        id: OperationId,
        group: GroupId,
        creator: Option<OperationId>,
    ) -> Operation {
        let mut cl = self.inner.lock().unwrap();
        cl.operations.insert(
            id,
            OpEntry {
                status: OperationStatus::Enabled,
                group,
                creator,
                notify: Arc::new(Notify::new()),
                pending_reply: None,
            },
        );
        cl.strategy.lock().unwrap().on_operation_created(id, group);
        drop(cl);
        Operation::new(id, group, creator, self.clone())
    }

    /// The group of `id`'s creator, if it is still known to the
    /// scheduler — used to implement group inheritance at spawn.
    pub(crate) fn group_of(&self, id: OperationId) -> Option<GroupId> {
        self.inner.lock().unwrap().operations.get(&id).map(|e| e.group)
    }

    pub(crate) fn is_terminal(&self, id: OperationId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .operations
            .get(&id)
            .map(|e| e.status.is_terminal())
            .unwrap_or(true)
    }

    pub(crate) async fn set_status(&self, id: OperationId, status: OperationStatus) {
        let mut cl = self.inner.lock().unwrap();
        if let Some(entry) = cl.operations.get_mut(&id) {
            entry.status = status;
        }
        cl.try_advance();
    }

    pub(crate) async fn terminate(&self, id: OperationId, status: OperationStatus) {
        let mut cl = self.inner.lock().unwrap();
        if let Some(entry) = cl.operations.get_mut(&id) {
            entry.status = status;
        }
        cl.pending.remove(&id);
        if cl.current == Some(id) {
            cl.current = None;
        }
        // block_until's predicate can only be re-checked by the blocked
        // operation itself; completing an operation is the one event
        // that can make a BlockedOnJoin predicate true, so wake any
        // joiner waiting on this id and let it re-check.
        let joiners: Vec<OperationId> = cl
            .operations
            .iter()
            .filter_map(|(joiner, entry)| match &entry.status {
                OperationStatus::BlockedOnJoin(targets) if targets.contains(&id) => Some(*joiner),
                _ => None,
            })
            .collect();
        for joiner in joiners {
            if let Some(entry) = cl.operations.get_mut(&joiner) {
                entry.status = OperationStatus::Enabled;
            }
        }
        cl.try_advance();
    }

    /// Mark `id` enabled, e.g. because an envelope was just delivered to
    /// its actor's inbox while it sat `BlockedOnReceive`. A no-op if `id`
    /// was not actually blocked.
    pub(crate) fn wake(&self, id: OperationId) {
        let mut cl = self.inner.lock().unwrap();
        if let Some(entry) = cl.operations.get_mut(&id) {
            if !entry.status.is_terminal() {
                entry.status = OperationStatus::Enabled;
            }
        }
        cl.try_advance();
    }

    async fn wait_for_reply(&self, id: OperationId, kind: PointKind, suppressed: bool) -> PointReply {
        let notify = {
            let mut cl = self.inner.lock().unwrap();
            cl.pending.insert(id, kind);
            if cl.current == Some(id) {
                cl.current = None;
            }
            cl.last_parked = Some((id, suppressed));
            cl.try_advance();
            if let Some(entry) = cl.operations.get_mut(&id) {
                if let Some(reply) = entry.pending_reply.take() {
                    return reply;
                }
                entry.notify.clone()
            } else {
                return PointReply::Go;
            }
        };

        notify.notified().await;

        let mut cl = self.inner.lock().unwrap();
        cl.operations
            .get_mut(&id)
            .and_then(|entry| entry.pending_reply.take())
            .unwrap_or(PointReply::Go)
    }

    pub(crate) async fn schedule_point(&self, id: OperationId, kind: PointKind, suppressed: bool) {
        self.wait_for_reply(id, kind, suppressed).await;
    }

    pub(crate) async fn next_bool(&self, id: OperationId, fair: bool, suppressed: bool) -> bool {
        match self
            .wait_for_reply(id, PointKind::NextBool { fair }, suppressed)
            .await
        {
            PointReply::Bool(v) => v,
            _ => false,
        }
    }

    pub(crate) async fn next_int(&self, id: OperationId, limit: u64, suppressed: bool) -> u64 {
        match self
            .wait_for_reply(id, PointKind::NextInt { limit }, suppressed)
            .await
        {
            PointReply::Int(v) => v,
            _ => 0,
        }
    }

    pub(crate) fn trace(&self) -> TraceRecorder {
        self.inner.lock().unwrap().trace.clone()
    }

    pub(crate) fn step_count(&self) -> u64 {
        self.inner.lock().unwrap().step
    }

    pub(crate) fn strategy_name(&self) -> &'static str {
        self.inner.lock().unwrap().strategy.lock().unwrap().name()
    }

    /// Notify the strategy that the iteration it was built for has
    /// ended, e.g. so `DfsStrategy` can compute its next backtrack
    /// point before the engine builds the next iteration's handle
    /// around this same strategy instance.
    pub(crate) fn finish_iteration(&self, bug_found: bool) {
        self.inner.lock().unwrap().strategy.lock().unwrap().on_iteration_end(bug_found);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::strategies::RandomStrategy;

    fn handle(max_steps: u64) -> (SchedulerHandle, oneshot::Receiver<FinishOutcome>) {
        let (tx, rx) = oneshot::channel();
        let strategy: Arc<Mutex<Box<dyn Strategy>>> = Arc::new(Mutex::new(Box::new(RandomStrategy::new(1))));
        (SchedulerHandle::new(strategy, max_steps, 1, tx), rx)
    }

    #[tokio::test]
    async fn completing_the_only_operation_finishes_the_iteration() {
        let (scheduler, rx) = handle(100);
        let op = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);
        op.schedule_next().await;
        op.complete().await;
        match rx.await.unwrap() {
            FinishOutcome::Done => {}
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn halting_one_operation_hands_the_baton_to_the_other() {
        let (scheduler, rx) = handle(100);
        let a = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);
        let b = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);

        // `a` is the only enabled operation, so this is granted
        // synchronously and `a` now holds the baton.
        a.schedule_next().await;

        let b_id = b.id();
        let b_task = tokio::spawn(async move {
            b.schedule_next().await;
            b.complete().await;
        });
        // Wait until `b` has actually parked behind `a`'s baton before
        // terminating `a`, so the release is observed rather than raced.
        while !scheduler.inner.lock().unwrap().pending.contains_key(&b_id) {
            tokio::task::yield_now().await;
        }

        // Terminating without ever completing normally must still
        // release the baton for `b` to make progress.
        a.halt().await;
        b_task.await.unwrap();

        match rx.await.unwrap() {
            FinishOutcome::Done => {}
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_enabled_operation_with_blocked_survivors_is_a_deadlock() {
        let (scheduler, rx) = handle(100);
        let op = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);
        op.schedule_next().await;
        // The predicate never becomes true, so this task parks forever;
        // only the scheduler-side outcome on `rx` is observed.
        tokio::spawn(async move {
            op.block_until(OperationStatus::BlockedOnReceive, || false).await;
        });
        match rx.await.unwrap() {
            FinishOutcome::Deadlock { remaining } => assert_eq!(remaining, 1),
            other => panic!("expected Deadlock, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exceeding_max_steps_is_unfair_not_a_deadlock() {
        let (scheduler, rx) = handle(2);
        let a = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);
        let b = scheduler.register(OperationId::fresh(), GroupId::fresh(), None);
        // Neither task ever completes; once `max_steps` is exceeded the
        // scheduler stops granting the baton at all, so only the
        // scheduler-side outcome on `rx` is observed.
        let a_task = tokio::spawn(async move {
            loop {
                a.schedule_next().await;
            }
        });
        let b_task = tokio::spawn(async move {
            loop {
                b.schedule_next().await;
            }
        });
        let outcome = rx.await.unwrap();
        a_task.abort();
        b_task.abort();
        match outcome {
            FinishOutcome::Unfair { .. } => {}
            other => panic!("expected Unfair, got {other:?}"),
        }
    }
}
