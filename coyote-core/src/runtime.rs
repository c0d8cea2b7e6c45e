//! The runtime façade: the public entry points user code and actor
//! handlers call to spawn actors, send events, and talk to monitors.
//!
//! Per the redesign note on the source's global static runtime, there is
//! no process-wide singleton here — every caller goes through an
//! explicit [`RuntimeHandle`]. A [`tokio::task_local!`] slot gives handler
//! bodies and free-standing test code ambient access to "the current
//! operation" and "the current runtime" without threading both through
//! every call, the same ergonomic tradeoff the teacher's thread-local
//! runtime handle makes — built on a task-local here instead, since an
//! operation's continuations can hop across worker threads under a
//! multi-threaded executor and a plain thread-local would lose track of
//! them across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::actor::{run_actor, ActorMachine, StateMachineDef};
use crate::error::{CoyoteError, Fault, Result};
use crate::event::{Envelope, Event};
use crate::id::{ActorId, GroupId, MonitorId, OperationId};
use crate::monitor::{Monitor, MonitorDef};
use crate::operation::Operation;
use crate::queue::Inbox;
use crate::scheduler::SchedulerHandle;

tokio::task_local! {
    static CURRENT_RUNTIME: RuntimeHandle;
    static CURRENT_OPERATION: Operation;
}

/// The operation hosting the currently executing async task, if any
/// (absent outside a runtime-managed task, e.g. in a plain unit test).
pub fn current_operation() -> Option<Operation> {
    CURRENT_OPERATION.try_with(|op| op.clone()).ok()
}

/// The runtime hosting the currently executing async task, if any.
pub fn get_runtime() -> Option<RuntimeHandle> {
    CURRENT_RUNTIME.try_with(|rt| rt.clone()).ok()
}

struct ActorRegistration {
    inbox: Arc<Mutex<Inbox>>,
    operation_id: OperationId,
    kind: String,
    bound: bool,
}

struct RuntimeInner {
    scheduler: SchedulerHandle,
    actors: Mutex<HashMap<ActorId, ActorRegistration>>,
    monitors: Mutex<HashMap<MonitorId, Monitor>>,
    on_dropped: Mutex<Vec<Arc<dyn Fn(&Envelope) + Send + Sync>>>,
    on_failure: Mutex<Vec<Arc<dyn Fn(&CoyoteError) + Send + Sync>>>,
    fault: Mutex<Option<CoyoteError>>,
    iteration: usize,
}

/// A cheaply-cloneable reference to one test iteration's runtime state.
/// Dropped and rebuilt fresh for every iteration by [`crate::engine`].
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl RuntimeHandle {
    pub fn new(scheduler: SchedulerHandle, iteration: usize) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                scheduler,
                actors: Mutex::new(HashMap::new()),
                monitors: Mutex::new(HashMap::new()),
                on_dropped: Mutex::new(Vec::new()),
                on_failure: Mutex::new(Vec::new()),
                fault: Mutex::new(None),
                iteration,
            }),
        }
    }

    /// Run `fut` with this runtime and an operation both available from
    /// `current_operation()`/`get_runtime()` for the duration, and spawn
    /// it as its own cooperative operation. Used for the test entry
    /// point itself, which is not an actor but still needs a baton.
    pub async fn run_as_operation<F, T>(&self, group: Option<GroupId>, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let group = group.unwrap_or_else(GroupId::fresh);
        let op = self.scheduler().register(OperationId::fresh(), group, None);
        op.schedule_next().await;
        let result = CURRENT_RUNTIME
            .scope(self.clone(), CURRENT_OPERATION.scope(op.clone(), fut))
            .await;
        op.complete().await;
        result
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }

    pub fn step_count(&self) -> u64 {
        self.inner.scheduler.step_count()
    }

    fn inherited_group(&self) -> GroupId {
        current_operation()
            .and_then(|op| self.inner.scheduler.group_of(op.id()))
            .unwrap_or_else(GroupId::fresh)
    }

    /// Reserve an actor id of `kind` without spawning it yet. Paired
    /// with [`RuntimeHandle::bind`].
    pub fn reserve_id(&self, kind: impl Into<String>) -> ActorId {
        let id = ActorId::fresh();
        self.inner.actors.lock().unwrap().insert(
            id,
            ActorRegistration {
                inbox: Arc::new(Mutex::new(Inbox::new())),
                operation_id: OperationId::fresh(),
                kind: kind.into(),
                bound: false,
            },
        );
        id
    }

    /// Bind a previously reserved id to a concrete state machine
    /// definition and start its dispatch loop.
    pub fn bind(
        &self,
        id: ActorId,
        kind: impl Into<String>,
        def: Arc<StateMachineDef>,
        initial_event: Option<Event>,
    ) -> Result<()> {
        let kind = kind.into();
        {
            let actors = self.inner.actors.lock().unwrap();
            match actors.get(&id) {
                Some(reg) if reg.bound => {
                    return Err(CoyoteError::UsageError {
                        message: format!("actor {id} is already bound"),
                        fault: self.fault(),
                    })
                }
                Some(reg) if reg.kind != kind => {
                    return Err(CoyoteError::UsageError {
                        message: format!(
                            "actor {id} was reserved as '{}', bound as '{kind}'",
                            reg.kind
                        ),
                        fault: self.fault(),
                    })
                }
                Some(_) => {}
                None => {
                    return Err(CoyoteError::UsageError {
                        message: format!("actor {id} was never reserved"),
                        fault: self.fault(),
                    })
                }
            }
        }
        self.start_actor(id, def, initial_event);
        self.inner
            .actors
            .lock()
            .unwrap()
            .get_mut(&id)
            .expect("just checked")
            .bound = true;
        Ok(())
    }

    /// Spawn a fresh actor in one call, skipping the reserve/bind split.
    pub fn spawn_actor(
        &self,
        kind: impl Into<String>,
        def: Arc<StateMachineDef>,
        initial_event: Option<Event>,
    ) -> ActorId {
        let kind = kind.into();
        let id = ActorId::fresh();
        self.inner.actors.lock().unwrap().insert(
            id,
            ActorRegistration {
                inbox: Arc::new(Mutex::new(Inbox::new())),
                operation_id: OperationId::fresh(),
                kind,
                bound: true,
            },
        );
        self.start_actor(id, def, initial_event);
        id
    }

    fn start_actor(&self, id: ActorId, def: Arc<StateMachineDef>, initial_event: Option<Event>) {
        let group = self.inherited_group();
        let creator = current_operation().map(|op| op.id());
        let op_id = OperationId::fresh();
        let op = self.inner.scheduler.register(op_id, group, creator);

        let inbox = {
            let mut actors = self.inner.actors.lock().unwrap();
            let reg = actors.get_mut(&id).expect("registration inserted by caller");
            reg.operation_id = op_id;
            reg.inbox.clone()
        };

        let mut machine = ActorMachine::new(id, def, op.clone());
        machine.inbox = inbox;
        if let Some(event) = initial_event {
            machine.enqueue(Envelope::new(event, id));
        }

        let runtime = self.clone();
        let iteration = self.inner.iteration;
        tokio::spawn(CURRENT_RUNTIME.scope(
            runtime.clone(),
            CURRENT_OPERATION.scope(op.clone(), async move {
                op.schedule_next().await;
                if let Err(err) = run_actor(machine, runtime.clone(), iteration).await {
                    runtime.record_fault(err);
                    // `run_actor` only reaches its own `operation.halt()` by
                    // falling out the bottom of its loop; an early `Err`
                    // return skips that, so the baton would otherwise never
                    // be released and the scheduler would wait on a task
                    // that has already exited.
                    op.halt().await;
                }
            }),
        ));
    }

    /// Deliver an envelope to `target`'s inbox and wake its operation if
    /// it was parked waiting for exactly this. Synchronous: the
    /// scheduling points around a send are the caller's job (see
    /// `actor::dispatch::flush_outgoing`), not this function's.
    pub fn deliver(&self, sender: Option<ActorId>, target: ActorId, event: Event, must_handle: bool) -> Result<()> {
        let (inbox, op_id) = {
            let actors = self.inner.actors.lock().unwrap();
            match actors.get(&target) {
                Some(reg) if reg.bound => (reg.inbox.clone(), reg.operation_id),
                Some(_) => {
                    return Err(CoyoteError::UsageError {
                        message: format!("send to reserved-but-unbound id {target}"),
                        fault: self.fault(),
                    })
                }
                None => {
                    return Err(CoyoteError::UsageError {
                        message: format!("send to unbound id {target}"),
                        fault: self.fault(),
                    })
                }
            }
        };
        let group = self.inherited_group();
        let mut envelope = Envelope::new(event, target).with_group(group).must_handle(must_handle);
        if let Some(sender) = sender {
            envelope = envelope.with_sender(sender);
        }
        inbox.lock().unwrap().push(envelope);
        self.inner.scheduler.wake(op_id);
        Ok(())
    }

    /// Send from outside any actor context (e.g. a test driver), taking
    /// the surrounding scheduling points against the calling operation
    /// if one is active.
    pub async fn send(&self, target: ActorId, event: Event, must_handle: bool) -> Result<()> {
        if let Some(op) = current_operation() {
            op.before_send().await;
            let result = self.deliver(None, target, event, must_handle);
            op.after_send().await;
            result
        } else {
            self.deliver(None, target, event, must_handle)
        }
    }

    pub fn notify_dropped(&self, envelope: &Envelope) {
        let callbacks = self.inner.on_dropped.lock().unwrap().clone();
        for cb in callbacks {
            cb(envelope);
        }
    }

    pub fn on_event_dropped<F>(&self, cb: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.on_dropped.lock().unwrap().push(Arc::new(cb));
    }

    pub fn on_failure<F>(&self, cb: F)
    where
        F: Fn(&CoyoteError) + Send + Sync + 'static,
    {
        self.inner.on_failure.lock().unwrap().push(Arc::new(cb));
    }

    pub fn record_fault(&self, err: CoyoteError) {
        let callbacks = self.inner.on_failure.lock().unwrap().clone();
        for cb in callbacks {
            cb(&err);
        }
        let mut slot = self.inner.fault.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take_fault(&self) -> Option<CoyoteError> {
        self.inner.fault.lock().unwrap().take()
    }

    pub fn register_monitor(&self, def: Arc<MonitorDef>) -> MonitorId {
        let id = MonitorId::fresh();
        let monitor = Monitor::new(def);
        self.inner.monitors.lock().unwrap().insert(id, monitor);
        id
    }

    /// Deliver `event` to every registered monitor. Monitors never block
    /// user code, so this never awaits a scheduling point itself; the
    /// liveness checker samples monitor temperature independently.
    pub fn notify_monitor(&self, event: Event) -> Result<()> {
        let mut monitors = self.inner.monitors.lock().unwrap();
        for monitor in monitors.values_mut() {
            monitor.handle(&event, self.fault())?;
        }
        Ok(())
    }

    pub fn monitor_snapshot(&self) -> Vec<(MonitorId, bool)> {
        self.inner
            .monitors
            .lock()
            .unwrap()
            .iter()
            .map(|(id, m)| (*id, m.is_hot()))
            .collect()
    }

    pub fn tick_monitor_temperature(&self, threshold: u32) -> Option<CoyoteError> {
        let mut monitors = self.inner.monitors.lock().unwrap();
        for monitor in monitors.values_mut() {
            if let Some(err) = monitor.tick(threshold, self.fault()) {
                return Some(err);
            }
        }
        None
    }

    fn fault(&self) -> Fault {
        Fault::new(self.inner.iteration, self.step_count())
    }

    /// Force the active strategy's next fair coin flip, used by the
    /// liveness checker to push a stuck schedule toward progress.
    pub fn force_fair_flip(&self, value: bool) {
        self.inner.scheduler.force_next_fair_bool(value);
    }

    /// A content hash of every actor's inbox shape and every monitor's
    /// current state, folded together with an optional caller-supplied
    /// value (`HashedState`). Two snapshots with the same hash are
    /// assumed to imply the same future under a deterministic strategy —
    /// the basis for cycle detection in [`crate::liveness`].
    pub fn snapshot_hash(&self, user_contributed: Option<u64>) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();

        let mut actors: Vec<(ActorId, u64, String)> = {
            let registry = self.inner.actors.lock().unwrap();
            registry
                .iter()
                .map(|(id, reg)| (*id, reg.inbox.lock().unwrap().structural_hash(), reg.kind.clone()))
                .collect()
        };
        actors.sort_by_key(|(id, _, _)| id.raw());
        for (id, inbox_hash, kind) in &actors {
            id.raw().hash(&mut hasher);
            inbox_hash.hash(&mut hasher);
            kind.hash(&mut hasher);
        }

        let mut monitor_states: Vec<String> = self
            .inner
            .monitors
            .lock()
            .unwrap()
            .values()
            .map(|m| m.current_state().to_string())
            .collect();
        monitor_states.sort();
        monitor_states.hash(&mut hasher);

        user_contributed.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::StateMachineBuilder;
    use crate::scheduler::strategies::RandomStrategy;
    use crate::scheduler::{FinishOutcome, Strategy};
    use proptest::prelude::*;

    fn test_scheduler(seed: u64) -> (SchedulerHandle, tokio::sync::oneshot::Receiver<FinishOutcome>) {
        let (tx, rx) = tokio::sync::oneshot::channel::<FinishOutcome>();
        let strategy: Arc<Mutex<Box<dyn Strategy>>> = Arc::new(Mutex::new(Box::new(RandomStrategy::new(seed))));
        (SchedulerHandle::new(strategy, 10_000, seed, tx), rx)
    }

    fn leaf_def() -> Arc<StateMachineDef> {
        Arc::new(StateMachineBuilder::new("Leaf").state("Leaf", |s| s).build().unwrap())
    }

    fn mid_def(leaf: Arc<StateMachineDef>) -> Arc<StateMachineDef> {
        Arc::new(
            StateMachineBuilder::new("Mid")
                .state("Mid", move |s| {
                    let leaf = leaf.clone();
                    s.on_entry(move |ctx| {
                        ctx.runtime().spawn_actor("leaf", leaf.clone(), None);
                        Ok(())
                    })
                })
                .build()
                .unwrap(),
        )
    }

    proptest! {
        /// Every actor spawned while a group G holds the baton — whether
        /// spawned directly or from inside another actor's own hook —
        /// lands in G, never a fresh group of its own (spec.md §4.7).
        #[test]
        fn every_transitively_spawned_actor_inherits_the_root_operations_group(mid_count in 1usize..6) {
            let tokio_rt = tokio::runtime::Runtime::new().unwrap();
            let (groups, root_group) = tokio_rt.block_on(async move {
                let (scheduler, _rx) = test_scheduler(1);
                let rt = RuntimeHandle::new(scheduler.clone(), 0);
                let leaf = leaf_def();
                let root_group = GroupId::fresh();
                let spawn_rt = rt.clone();

                rt.run_as_operation(Some(root_group), async move {
                    for _ in 0..mid_count {
                        spawn_rt.spawn_actor("mid", mid_def(leaf.clone()), None);
                    }
                    if let Some(op) = current_operation() {
                        for _ in 0..20 {
                            op.schedule_next().await;
                        }
                    }
                })
                .await;

                let groups: Vec<Option<GroupId>> = rt
                    .inner
                    .actors
                    .lock()
                    .unwrap()
                    .values()
                    .map(|reg| scheduler.group_of(reg.operation_id))
                    .collect();
                (groups, root_group)
            });
            prop_assert!(!groups.is_empty());
            prop_assert!(groups.into_iter().all(|g| g == Some(root_group)));
        }
    }
}
