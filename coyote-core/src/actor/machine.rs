//! The live actor instance: its state stack, inbox, and the context
//! object handler bodies run against.

use std::sync::{Arc, Mutex};

use crate::error::{CoyoteError, Fault, Result};
use crate::event::{Envelope, Event};
use crate::id::ActorId;
use crate::operation::Operation;
use crate::queue::Inbox;
use crate::runtime::RuntimeHandle;

use super::handler::{HookFn, StateId, StateMachineDef};

/// `Created -> Running -> Halting -> Halted`, per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorLifecycle {
    Created,
    Running,
    Halting,
    Halted,
}

/// What `OnException` decides to do with an error raised inside a
/// handler or hook body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExceptionAction {
    /// Swallow the error, keep running.
    Handled,
    /// Treat it as a request to halt.
    Halt,
    /// Propagate; the iteration fails.
    Throw,
}

/// At most one of these may be requested per handler invocation; a
/// second request is a usage error caught by [`ActorContext`] itself.
#[derive(Debug, Clone)]
pub(crate) enum PendingTransition {
    Raise(Event),
    Goto(StateId),
    Push(StateId),
    Pop,
}

/// What a handler body or hook sees. Constructed fresh (borrowing the
/// actor's mutable parts) for each dispatch call.
pub struct ActorContext<'a> {
    actor_id: ActorId,
    runtime: &'a RuntimeHandle,
    def: &'a StateMachineDef,
    stack_depth: usize,
    in_on_exit: bool,
    in_halt_hook: bool,
    fault: Fault,
    pending: Option<PendingTransition>,
    outgoing: Vec<(ActorId, Event, bool)>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        actor_id: ActorId,
        runtime: &'a RuntimeHandle,
        def: &'a StateMachineDef,
        stack_depth: usize,
        in_on_exit: bool,
        in_halt_hook: bool,
        fault: Fault,
    ) -> Self {
        Self {
            actor_id,
            runtime,
            def,
            stack_depth,
            in_on_exit,
            in_halt_hook,
            fault,
            pending: None,
            outgoing: Vec::new(),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Consumes the context, returning both the requested transition (if
    /// any) and the envelopes queued via `send`. The caller — always the
    /// dispatch loop, never user code — is responsible for actually
    /// taking the async scheduling points around delivery; a sync
    /// handler body cannot `.await` them itself.
    pub(crate) fn take_pending(self) -> (Option<PendingTransition>, Vec<(ActorId, Event, bool)>) {
        (self.pending, self.outgoing)
    }

    fn check_clear_slot(&self, what: &str) -> Result<()> {
        if self.in_halt_hook {
            return Err(CoyoteError::UsageError {
                message: format!("InvokedWhileHalted({what})"),
                fault: self.fault,
            });
        }
        if self.pending.is_some() {
            return Err(CoyoteError::UsageError {
                message: format!("{what} after a prior raise/goto/push/pop in the same handler"),
                fault: self.fault,
            });
        }
        Ok(())
    }

    pub fn raise(&mut self, event: Event) -> Result<()> {
        self.check_clear_slot("raise")?;
        self.pending = Some(PendingTransition::Raise(event));
        Ok(())
    }

    pub fn goto(&mut self, target: impl Into<StateId>) -> Result<()> {
        if self.in_on_exit {
            return Err(CoyoteError::UsageError {
                message: "goto invoked from OnExit".into(),
                fault: self.fault,
            });
        }
        self.check_clear_slot("goto")?;
        let target = target.into();
        if !self.def.contains(&target) {
            return Err(CoyoteError::UsageError {
                message: format!("goto to undeclared state '{target}'"),
                fault: self.fault,
            });
        }
        self.pending = Some(PendingTransition::Goto(target));
        Ok(())
    }

    pub fn push(&mut self, target: impl Into<StateId>) -> Result<()> {
        if self.in_on_exit {
            return Err(CoyoteError::UsageError {
                message: "push invoked from OnExit".into(),
                fault: self.fault,
            });
        }
        self.check_clear_slot("push")?;
        let target = target.into();
        if !self.def.contains(&target) {
            return Err(CoyoteError::UsageError {
                message: format!("push to undeclared state '{target}'"),
                fault: self.fault,
            });
        }
        self.pending = Some(PendingTransition::Push(target));
        Ok(())
    }

    pub fn pop(&mut self) -> Result<()> {
        if self.in_on_exit {
            return Err(CoyoteError::UsageError {
                message: "pop invoked from OnExit".into(),
                fault: self.fault,
            });
        }
        self.check_clear_slot("pop")?;
        if self.stack_depth <= 1 {
            return Err(CoyoteError::UsageError {
                message: "popped with no matching push".into(),
                fault: self.fault,
            });
        }
        self.pending = Some(PendingTransition::Pop);
        Ok(())
    }

    /// Queue an outgoing envelope. The actual delivery (and its
    /// surrounding before/after-send scheduling points) happens after
    /// this handler returns, driven by the dispatch loop.
    pub fn send(&mut self, target: ActorId, event: Event, must_handle: bool) -> Result<()> {
        if self.in_halt_hook {
            return Err(CoyoteError::UsageError {
                message: "InvokedWhileHalted(send)".into(),
                fault: self.fault,
            });
        }
        if self.pending.is_some() {
            return Err(CoyoteError::UsageError {
                message: "send after a raise/goto/push/pop in the same handler".into(),
                fault: self.fault,
            });
        }
        self.outgoing.push((target, event, must_handle));
        Ok(())
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            Ok(())
        } else {
            Err(CoyoteError::AssertionFailure {
                message: message.into(),
                fault: self.fault,
            })
        }
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        self.runtime
    }
}

/// The live instance of a declared state machine, owned exclusively by
/// the runtime for the duration of one dispatch loop.
pub struct ActorMachine {
    pub id: ActorId,
    pub def: Arc<StateMachineDef>,
    pub stack: Vec<StateId>,
    pub inbox: Arc<Mutex<Inbox>>,
    pub lifecycle: ActorLifecycle,
    pub operation: Operation,
    pub on_exception: Option<Arc<dyn Fn(&CoyoteError) -> OnExceptionAction + Send + Sync>>,
    pub on_event_unhandled: Option<Arc<dyn Fn(&Event) -> OnExceptionAction + Send + Sync>>,
    pub on_halt: Option<Arc<HookFn>>,
}

impl ActorMachine {
    pub fn new(id: ActorId, def: Arc<StateMachineDef>, operation: Operation) -> Self {
        let start = def.start().clone();
        let on_exception = def.on_exception.clone();
        let on_event_unhandled = def.on_event_unhandled.clone();
        let on_halt = def.on_halt.clone();
        Self {
            id,
            def,
            stack: vec![start],
            inbox: Arc::new(Mutex::new(Inbox::new())),
            lifecycle: ActorLifecycle::Created,
            operation,
            on_exception,
            on_event_unhandled,
            on_halt,
        }
    }

    pub fn current_state(&self) -> &StateId {
        self.stack.last().expect("state stack never empties")
    }

    /// Queue an envelope this actor sent to itself (e.g. via `raise`).
    /// Cross-actor sends go through [`RuntimeHandle::deliver`] instead,
    /// since they must also wake the target's parked operation.
    pub fn enqueue(&mut self, envelope: Envelope) {
        self.inbox.lock().unwrap().push(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::handler::StateMachineBuilder;
    use crate::scheduler::strategies::RandomStrategy;
    use crate::scheduler::{FinishOutcome, SchedulerHandle, Strategy};

    fn test_runtime() -> RuntimeHandle {
        let (tx, _rx) = tokio::sync::oneshot::channel::<FinishOutcome>();
        let strategy: Arc<Mutex<Box<dyn Strategy>>> = Arc::new(Mutex::new(Box::new(RandomStrategy::new(0))));
        let scheduler = SchedulerHandle::new(strategy, 1_000, 0, tx);
        RuntimeHandle::new(scheduler, 0)
    }

    fn context<'a>(runtime: &'a RuntimeHandle, def: &'a StateMachineDef, stack_depth: usize) -> ActorContext<'a> {
        ActorContext::new(ActorId::fresh(), runtime, def, stack_depth, false, false, Fault::default())
    }

    fn two_state_def() -> StateMachineDef {
        StateMachineBuilder::new("S1")
            .state("S1", |s| s)
            .state("S2", |s| s)
            .build()
            .unwrap()
    }

    #[test]
    fn goto_to_undeclared_state_is_a_usage_error() {
        let runtime = test_runtime();
        let def = two_state_def();
        let mut ctx = context(&runtime, &def, 1);
        let err = ctx.goto("Nowhere").unwrap_err();
        assert!(matches!(err, CoyoteError::UsageError { .. }));
    }

    #[test]
    fn popping_the_last_frame_is_a_usage_error() {
        let runtime = test_runtime();
        let def = two_state_def();
        let mut ctx = context(&runtime, &def, 1);
        let err = ctx.pop().unwrap_err();
        assert!(err.to_string().contains("no matching push"));
    }

    #[test]
    fn a_second_transition_in_one_handler_is_rejected() {
        let runtime = test_runtime();
        let def = two_state_def();
        let mut ctx = context(&runtime, &def, 2);
        ctx.goto("S2").unwrap();
        let err = ctx.goto("S1").unwrap_err();
        assert!(err.to_string().contains("after a prior raise/goto/push/pop"));
    }

    #[test]
    fn mutating_methods_reject_calls_made_from_the_halt_hook() {
        let runtime = test_runtime();
        let def = two_state_def();
        let mut ctx = ActorContext::new(ActorId::fresh(), &runtime, &def, 1, false, true, Fault::default());
        let err = ctx.goto("S2").unwrap_err();
        assert!(err.to_string().contains("InvokedWhileHalted(goto)"));
        let err = ctx.send(ActorId::fresh(), Event::new("E"), false).unwrap_err();
        assert!(err.to_string().contains("InvokedWhileHalted(send)"));
    }
}
