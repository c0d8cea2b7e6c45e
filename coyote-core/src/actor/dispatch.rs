//! The per-actor dispatch loop: dequeue, resolve an action through the
//! state hierarchy, apply it, and drive the halt sequence.
//!
//! Handler bodies are synchronous (they cannot await a scheduling point
//! themselves), so `send` only queues envelopes on the context; this loop
//! is what actually takes the before/after-send points and hands them to
//! [`RuntimeHandle::deliver`] once a handler returns.

use tracing::warn;

use crate::error::{CoyoteError, Fault, Result};
use crate::event::{Envelope, Event};
use crate::id::ActorId;
use crate::operation::OperationStatus;
use crate::queue::Disposition;
use crate::runtime::RuntimeHandle;

use super::handler::{EventAction, StateId, StateMachineDef};
use super::machine::{ActorContext, ActorLifecycle, ActorMachine, OnExceptionAction, PendingTransition};

fn fault(runtime: &RuntimeHandle, iteration: usize) -> Fault {
    Fault::new(iteration, runtime.step_count())
}

/// Classify an envelope at the head of the scan per the dispatch
/// decision order: ignore/defer short-circuit, everything else is taken
/// and resolved against the handler table proper (including the
/// undeclared-event fallback) once it's off the queue.
fn classify(def: &StateMachineDef, state: &StateId, halting: bool, env: &Envelope) -> Disposition {
    if env.event.is_halt() {
        return Disposition::Take;
    }
    match def.resolve(state, env.event.tag()) {
        Some(EventAction::Ignore) => Disposition::Drop {
            must_handle_violation: env.must_handle,
        },
        Some(EventAction::Defer) => Disposition::Defer,
        Some(_) => Disposition::Take,
        None if halting => Disposition::Drop {
            must_handle_violation: env.must_handle,
        },
        None => Disposition::Take,
    }
}

/// Drain a context's queued sends, taking the before/after-send
/// scheduling points around each delivery in order.
async fn flush_outgoing(actor: &ActorMachine, runtime: &RuntimeHandle, outgoing: Vec<(ActorId, Event, bool)>) -> Result<()> {
    for (target, event, must_handle) in outgoing {
        actor.operation.before_send().await;
        runtime.deliver(Some(actor.id), target, event, must_handle)?;
        actor.operation.after_send().await;
    }
    Ok(())
}

async fn run_hook(
    actor: &mut ActorMachine,
    runtime: &RuntimeHandle,
    iteration: usize,
    in_on_exit: bool,
    in_halt_hook: bool,
    hook: &crate::actor::handler::HookFn,
) -> Result<()> {
    let depth = actor.stack.len();
    let mut ctx = ActorContext::new(
        actor.id,
        runtime,
        &actor.def,
        depth,
        in_on_exit,
        in_halt_hook,
        fault(runtime, iteration),
    );
    let result = hook(&mut ctx);
    let (pending, outgoing) = ctx.take_pending();
    handle_outcome(actor, result)?;
    flush_outgoing(actor, runtime, outgoing).await?;
    if let Some(PendingTransition::Raise(event)) = pending {
        if event.is_halt() {
            actor.lifecycle = ActorLifecycle::Halting;
        } else {
            actor.enqueue(Envelope::new(event, actor.id));
        }
    }
    Ok(())
}

fn handle_outcome(actor: &mut ActorMachine, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => match actor.on_exception.clone() {
            Some(handler) => match handler(&err) {
                OnExceptionAction::Handled => {
                    warn!(target: "coyote::error", actor = %actor.id, error = %err, "OnException swallowed a handler error");
                    Ok(())
                }
                OnExceptionAction::Halt => {
                    warn!(target: "coyote::error", actor = %actor.id, error = %err, "OnException requested a halt");
                    actor.lifecycle = ActorLifecycle::Halting;
                    Ok(())
                }
                OnExceptionAction::Throw => {
                    warn!(target: "coyote::error", actor = %actor.id, error = %err, "OnException chose to propagate a handler error");
                    Err(err)
                }
            },
            None => {
                warn!(target: "coyote::error", actor = %actor.id, error = %err, "handler error propagated with no OnException hook registered");
                Err(err)
            }
        },
    }
}

async fn enter_state(actor: &mut ActorMachine, runtime: &RuntimeHandle, iteration: usize) -> Result<()> {
    let id = actor.current_state().clone();
    if let Some(hook) = actor.def.state(&id).and_then(|s| s.on_entry.clone()) {
        run_hook(actor, runtime, iteration, false, false, &*hook).await?;
    }
    Ok(())
}

async fn exit_state(actor: &mut ActorMachine, runtime: &RuntimeHandle, iteration: usize) -> Result<()> {
    let id = actor.current_state().clone();
    if let Some(hook) = actor.def.state(&id).and_then(|s| s.on_exit.clone()) {
        run_hook(actor, runtime, iteration, true, false, &*hook).await?;
    }
    Ok(())
}

async fn apply_transition(
    actor: &mut ActorMachine,
    runtime: &RuntimeHandle,
    iteration: usize,
    transition: PendingTransition,
) -> Result<()> {
    match transition {
        PendingTransition::Raise(event) => {
            if event.is_halt() {
                actor.lifecycle = ActorLifecycle::Halting;
            } else {
                actor.enqueue(Envelope::new(event, actor.id));
            }
            Ok(())
        }
        PendingTransition::Goto(target) => {
            exit_state(actor, runtime, iteration).await?;
            *actor.stack.last_mut().expect("non-empty stack") = target;
            enter_state(actor, runtime, iteration).await
        }
        PendingTransition::Push(target) => {
            actor.stack.push(target);
            enter_state(actor, runtime, iteration).await
        }
        PendingTransition::Pop => {
            exit_state(actor, runtime, iteration).await?;
            actor.stack.pop();
            Ok(())
        }
    }
}

async fn dispatch_envelope(
    actor: &mut ActorMachine,
    runtime: &RuntimeHandle,
    iteration: usize,
    envelope: Envelope,
) -> Result<()> {
    if envelope.event.is_halt() {
        actor.lifecycle = ActorLifecycle::Halting;
        return Ok(());
    }

    let state = actor.current_state().clone();
    let action = actor.def.resolve(&state, envelope.event.tag()).cloned();

    match action {
        Some(EventAction::Goto(target)) => {
            apply_transition(actor, runtime, iteration, PendingTransition::Goto(target)).await
        }
        Some(EventAction::Push(target)) => {
            apply_transition(actor, runtime, iteration, PendingTransition::Push(target)).await
        }
        Some(EventAction::Defer) | Some(EventAction::Ignore) => {
            unreachable!("deferred/ignored envelopes never reach dispatch")
        }
        Some(EventAction::Action(handler)) => {
            let depth = actor.stack.len();
            let mut ctx = ActorContext::new(
                actor.id,
                runtime,
                &actor.def,
                depth,
                false,
                false,
                fault(runtime, iteration),
            );
            let result = handler(&mut ctx, &envelope.event);
            let (pending, outgoing) = ctx.take_pending();
            handle_outcome(actor, result)?;
            flush_outgoing(actor, runtime, outgoing).await?;
            if let Some(transition) = pending {
                apply_transition(actor, runtime, iteration, transition).await?;
            }
            Ok(())
        }
        None => {
            warn!(target: "coyote::error", actor = %actor.id, event = envelope.event.tag(), state = %state, "no declared action for this event in the current state or any ancestor");
            if let Some(hook) = actor.on_event_unhandled.clone() {
                match hook(&envelope.event) {
                    OnExceptionAction::Handled => Ok(()),
                    OnExceptionAction::Halt => {
                        actor.lifecycle = ActorLifecycle::Halting;
                        Ok(())
                    }
                    OnExceptionAction::Throw => Err(CoyoteError::UnhandledEvent {
                        actor: actor.id,
                        event: envelope.event.tag().to_string(),
                        fault: fault(runtime, iteration),
                    }),
                }
            } else {
                Err(CoyoteError::UnhandledEvent {
                    actor: actor.id,
                    event: envelope.event.tag().to_string(),
                    fault: fault(runtime, iteration),
                })
            }
        }
    }
}

fn drain_for_halt(actor: &ActorMachine, runtime: &RuntimeHandle, iteration: usize) -> Result<()> {
    for envelope in actor.inbox.lock().unwrap().drain() {
        if envelope.must_handle {
            warn!(
                target: "coyote::error",
                actor = %actor.id,
                event = envelope.event.tag(),
                "halted with an undequeued must-handle event still in the inbox"
            );
            return Err(CoyoteError::MustHandleViolation {
                message: format!(
                    "halted before dequeueing must-handle event '{}'",
                    envelope.event.tag()
                ),
                fault: fault(runtime, iteration),
            });
        }
        runtime.notify_dropped(&envelope);
    }
    Ok(())
}

/// Drive one actor's lifecycle to completion: `Created -> Running ->
/// Halting -> Halted`. Returns once the actor halts or a fault occurs.
pub async fn run_actor(mut actor: ActorMachine, runtime: RuntimeHandle, iteration: usize) -> Result<()> {
    enter_state(&mut actor, &runtime, iteration).await?;

    loop {
        if actor.lifecycle == ActorLifecycle::Halting {
            drain_for_halt(&actor, &runtime, iteration)?;
            if let Some(hook) = actor.on_halt.clone() {
                run_hook(&mut actor, &runtime, iteration, false, true, &*hook).await?;
            }
            actor.lifecycle = ActorLifecycle::Halted;
            actor.operation.halt().await;
            return Ok(());
        }

        actor.operation.before_dequeue().await;

        let def = actor.def.clone();
        let state = actor.current_state().clone();
        let mut violation: Option<CoyoteError> = None;
        let taken = {
            let mut inbox = actor.inbox.lock().unwrap();
            inbox.try_dequeue(
                |env| classify(&def, &state, false, env),
                |env, must_handle_violation| {
                    if must_handle_violation {
                        if violation.is_none() {
                            violation = Some(CoyoteError::MustHandleViolation {
                                message: format!(
                                    "event '{}' was ignored but marked must-handle",
                                    env.event.tag()
                                ),
                                fault: fault(&runtime, iteration),
                            });
                        }
                    } else {
                        runtime.notify_dropped(env);
                    }
                },
            )
        };
        if let Some(err) = violation {
            return Err(err);
        }

        let envelope = match taken {
            Some(e) => e,
            None => {
                if actor.lifecycle == ActorLifecycle::Created {
                    actor.lifecycle = ActorLifecycle::Running;
                }
                let inbox = actor.inbox.clone();
                actor
                    .operation
                    .block_until(OperationStatus::BlockedOnReceive, || !inbox.lock().unwrap().is_empty())
                    .await;
                continue;
            }
        };

        if actor.lifecycle == ActorLifecycle::Created {
            actor.lifecycle = ActorLifecycle::Running;
        }

        dispatch_envelope(&mut actor, &runtime, iteration, envelope).await?;
    }
}
