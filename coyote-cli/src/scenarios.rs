//! Built-in scenarios the CLI can run by name. Each one is a small,
//! self-contained program against `coyote_core`'s actor and monitor
//! builders — the in-process stand-in for the "assembly under test" a
//! binary-rewriting harness would otherwise load from disk.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use coyote_core::error::{CoyoteError, Fault};
use coyote_core::monitor::MonitorBuilder;
use coyote_core::{current_operation, ActorId, Event, Result, RuntimeHandle, StateMachineBuilder};
use serde_json::json;

type ScenarioFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A named, reusable test program. `run` is a plain function pointer
/// (not a closure) so the registry can be a `const`-friendly table.
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub run: fn(RuntimeHandle) -> ScenarioFuture,
}

pub fn registry() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "twopc-commit",
            description: "Two-phase commit where every replica votes to commit",
            run: |rt| Box::pin(two_phase_commit(rt, true)),
        },
        Scenario {
            name: "twopc-abort",
            description: "Two-phase commit where one replica votes to abort",
            run: |rt| Box::pin(two_phase_commit(rt, false)),
        },
        Scenario {
            name: "unbalanced-pop",
            description: "An actor pops its state stack with no matching push",
            run: |rt| Box::pin(unbalanced_pop(rt)),
        },
        Scenario {
            name: "must-handle-halt",
            description: "A must-handle event arrives to an actor that halts without dequeueing it",
            run: |rt| Box::pin(must_handle_after_halt(rt)),
        },
        Scenario {
            name: "watchdog-liveness",
            description: "A producer loops forever without ever satisfying a hot monitor",
            run: |rt| Box::pin(watchdog_liveness(rt)),
        },
        Scenario {
            name: "fair-termination",
            description: "An actor flips a fair coin every turn until it lands on halt",
            run: |rt| Box::pin(fair_termination(rt)),
        },
    ]
}

pub fn lookup(name: &str) -> Option<Scenario> {
    registry().into_iter().find(|s| s.name == name)
}

/// Yield a bounded number of scheduling points so other operations get a
/// chance to run before a scenario inspects shared state it doesn't own.
async fn settle(rounds: usize) {
    if let Some(op) = current_operation() {
        for _ in 0..rounds {
            op.schedule_next().await;
        }
    }
}

fn fault(rt: &RuntimeHandle) -> Fault {
    Fault::new(0, rt.step_count())
}

/// Scenarios 1 and 2 of the end-to-end suite: a coordinator prepares a
/// write against two replicas and commits only on unanimous agreement.
async fn two_phase_commit(rt: RuntimeHandle, second_replica_commits: bool) -> Result<()> {
    let store: Arc<Mutex<HashMap<u64, u64>>> = Arc::new(Mutex::new(HashMap::new()));

    let replica_a = spawn_replica(&rt, "replica-a", true);
    let replica_b = spawn_replica(&rt, "replica-b", second_replica_commits);
    let coordinator = spawn_coordinator(&rt, store.clone(), replica_a, replica_b);

    rt.send(coordinator, Event::with_payload("Write", json!({"idx": 1, "val": 7})), true)
        .await?;
    settle(40).await;

    let committed = store.lock().unwrap().get(&1).copied();
    if second_replica_commits {
        if committed != Some(7) {
            return Err(CoyoteError::AssertionFailure {
                message: format!("expected unanimous commit to store 7 at key 1, found {committed:?}"),
                fault: fault(&rt),
            });
        }
    } else if committed.is_some() {
        return Err(CoyoteError::AssertionFailure {
            message: format!("expected a global abort to leave the store untouched, found {committed:?}"),
            fault: fault(&rt),
        });
    }
    Ok(())
}

fn spawn_replica(rt: &RuntimeHandle, kind: &str, votes_commit: bool) -> ActorId {
    let def = StateMachineBuilder::new("Idle")
        .state("Idle", |s| {
            s.on_event("Prepare", move |ctx, event| {
                let sender = event.payload::<ActorId>().unwrap_or_else(|| ctx.actor_id());
                ctx.send(sender, Event::with_payload("Vote", json!({"commit": votes_commit})), false)
            })
            .ignore("GlobalCommit")
            .ignore("GlobalAbort")
        })
        .build()
        .expect("replica state machine is well-formed");
    rt.spawn_actor(kind, Arc::new(def), None)
}

fn spawn_coordinator(
    rt: &RuntimeHandle,
    store: Arc<Mutex<HashMap<u64, u64>>>,
    replica_a: ActorId,
    replica_b: ActorId,
) -> ActorId {
    let pending: Arc<Mutex<Option<(u64, u64)>>> = Arc::new(Mutex::new(None));
    let votes: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));

    let pending_for_write = pending.clone();
    let pending_for_vote = pending.clone();
    let votes_for_vote = votes.clone();

    let def = StateMachineBuilder::new("Idle")
        .state("Idle", move |s| {
            let pending = pending_for_write.clone();
            s.on_event("Write", move |ctx, event| {
                let write: serde_json::Value = event.payload().unwrap_or(json!({"idx": 0, "val": 0}));
                let idx = write["idx"].as_u64().unwrap_or_default();
                let val = write["val"].as_u64().unwrap_or_default();
                *pending.lock().unwrap() = Some((idx, val));
                let self_id = ctx.actor_id();
                ctx.send(replica_a, Event::with_payload("Prepare", self_id), true)?;
                ctx.send(replica_b, Event::with_payload("Prepare", self_id), true)?;
                ctx.goto("WaitingVotes")
            })
        })
        .state("WaitingVotes", move |s| {
            let pending = pending_for_vote.clone();
            let votes = votes_for_vote.clone();
            let store = store.clone();
            s.on_event("Vote", move |ctx, event| {
                let commit: bool = event
                    .payload::<serde_json::Value>()
                    .and_then(|v| v["commit"].as_bool())
                    .unwrap_or(false);
                let mut v = votes.lock().unwrap();
                v.push(commit);
                if v.len() < 2 {
                    return Ok(());
                }
                let unanimous = v.iter().all(|&c| c);
                if unanimous {
                    if let Some((idx, val)) = *pending.lock().unwrap() {
                        store.lock().unwrap().insert(idx, val);
                    }
                    ctx.send(replica_a, Event::new("GlobalCommit"), false)?;
                    ctx.send(replica_b, Event::new("GlobalCommit"), false)?;
                } else {
                    ctx.send(replica_a, Event::new("GlobalAbort"), false)?;
                    ctx.send(replica_b, Event::new("GlobalAbort"), false)?;
                }
                ctx.goto("Done")
            })
        })
        .state("Done", |s| s)
        .build()
        .expect("coordinator state machine is well-formed");
    rt.spawn_actor("coordinator", Arc::new(def), None)
}

/// Scenario 3: popping with no matching push is a usage error.
async fn unbalanced_pop(rt: RuntimeHandle) -> Result<()> {
    let def = StateMachineBuilder::new("S1")
        .state("S1", |s| s.on_entry(|ctx| ctx.pop()))
        .build()?;
    rt.spawn_actor("unbalanced", Arc::new(def), None);
    settle(10).await;
    Ok(())
}

/// Scenario 4: a must-handle event that arrives after `Halt` is drained
/// without being dequeued.
async fn must_handle_after_halt(rt: RuntimeHandle) -> Result<()> {
    let def = StateMachineBuilder::new("S1")
        .state("S1", |s| s.ignore("E"))
        .build()?;
    let actor = rt.spawn_actor("ignorer", Arc::new(def), None);
    rt.send(actor, Event::halt(), false).await?;
    rt.send(actor, Event::new("E"), true).await?;
    settle(20).await;
    Ok(())
}

/// Scenario 5: `WatchDog` starts hot and only cools on `Notify`, which
/// this producer never sends.
async fn watchdog_liveness(rt: RuntimeHandle) -> Result<()> {
    let monitor_def = MonitorBuilder::new("Hot")
        .state("Hot", |s| s.hot().goto("Notify", "Cold"))
        .state("Cold", |s| s.cold().goto("Notify", "Cold"))
        .build()?;
    rt.register_monitor(Arc::new(monitor_def));

    let def = StateMachineBuilder::new("Loop")
        .state("Loop", |s| {
            s.on_event("Message", |ctx, _event| {
                let self_id = ctx.actor_id();
                ctx.send(self_id, Event::new("Message"), false)
            })
        })
        .build()?;
    let actor = rt.spawn_actor("producer", Arc::new(def), Some(Event::new("Message")));
    let _ = actor;

    settle(500).await;
    Ok(())
}

/// Scenario 7: a loop that "sends `Message` to itself" on every turn and,
/// on a fair coin flip, eventually halts instead of looping forever. The
/// coin flip has to live on the driving operation itself — a declarative
/// handler body is synchronous and can't await a scheduling point — so
/// this scenario drives the loop directly rather than through an actor.
async fn fair_termination(rt: RuntimeHandle) -> Result<()> {
    let _ = &rt;
    if let Some(op) = current_operation() {
        loop {
            op.schedule_next().await;
            if op.random_bool(true).await {
                break;
            }
        }
    }
    Ok(())
}
