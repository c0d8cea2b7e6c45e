//! The test-engine iteration loop (spec.md §4.8): reset state, run a
//! scenario to completion under the configured strategy, decide
//! bug-vs-not, and emit a trace for the first bug found.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::info;

use crate::config::{RuntimeConfig, StrategyChoice};
use crate::error::{CoyoteError, Fault, Result};
use crate::id::{GroupId, OperationId};
use crate::liveness::LivenessChecker;
use crate::report::BugReport;
use crate::runtime::RuntimeHandle;
use crate::scheduler::strategies::{DfsStrategy, PctStrategy, RandomStrategy, ReplayStrategy};
use crate::scheduler::{FinishOutcome, SchedulerHandle, Strategy};
use crate::trace::{Trace, TraceOutcome};

/// What one call to [`Engine::run`] found.
#[derive(Debug)]
pub enum EngineOutcome {
    /// Every iteration completed with no bug.
    NoBug { iterations_run: usize },
    /// The first failing iteration's report; `iterations_run` counts
    /// iterations including this one.
    BugFound {
        report: BugReport,
        iterations_run: usize,
    },
}

/// Drives repeated iterations of a scenario under a configured
/// strategy. One `Engine` owns the strategy instance across its whole
/// `run` call so stateful strategies (`DfsStrategy`'s backtrack path)
/// see a coherent sequence of iterations.
pub struct Engine {
    config: RuntimeConfig,
}

impl Engine {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn build_strategy(&self) -> Result<Box<dyn Strategy>> {
        match &self.config.strategy {
            StrategyChoice::Random => Ok(Box::new(RandomStrategy::new(self.config.seed))),
            StrategyChoice::Dfs => Ok(Box::new(DfsStrategy::new())),
            StrategyChoice::Pct { depth } => Ok(Box::new(PctStrategy::new(self.config.seed, *depth))),
            StrategyChoice::Replay { trace_path } => {
                let text = std::fs::read_to_string(trace_path)?;
                let trace = Trace::parse(&text)?;
                Ok(Box::new(ReplayStrategy::new(trace)))
            }
        }
    }

    /// Run `scenario` for up to `config.iterations` iterations (or
    /// indefinitely under `fallback_to_fuzzing`, capped at ten times
    /// the configured count so a misconfigured fuzzing run still
    /// terminates), stopping at the first bug.
    ///
    /// `scenario` is called fresh for every iteration and is handed the
    /// runtime it should spawn actors and operations against.
    pub async fn run<F, Fut>(&self, scenario: F) -> Result<EngineOutcome>
    where
        F: Fn(RuntimeHandle) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let strategy: Arc<Mutex<Box<dyn Strategy>>> = Arc::new(Mutex::new(self.build_strategy()?));
        let iteration_cap = if self.config.fallback_to_fuzzing {
            self.config.iterations.saturating_mul(10).max(self.config.iterations)
        } else {
            self.config.iterations
        };

        for i in 0..iteration_cap {
            let seed = derive_seed(self.config.seed, i as u64);
            info!(target: "coyote::test", iteration = i, seed, "starting iteration");
            let (tx, rx) = oneshot::channel();
            let scheduler = SchedulerHandle::new(strategy.clone(), self.config.max_steps, seed, tx);
            let runtime = RuntimeHandle::new(scheduler.clone(), i);

            let scenario_fut = scenario(runtime.clone());
            let done = Arc::new(AtomicBool::new(false));

            let scenario_handle = {
                let runtime = runtime.clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let result = runtime.run_as_operation(None, scenario_fut).await;
                    done.store(true, Ordering::SeqCst);
                    result
                })
            };

            let sampler_handle = self.spawn_liveness_sampler(&runtime, i, done.clone());

            let outcome = rx.await.unwrap_or(FinishOutcome::Deadlock { remaining: 0 });
            let scenario_result = scenario_handle.await;
            if let Some(sampler_handle) = sampler_handle {
                let _ = sampler_handle.await;
            }

            if let Ok(Err(err)) = scenario_result {
                runtime.record_fault(err);
            }

            let fault_from_scenario = runtime.take_fault();
            let strategy_name = scheduler.strategy_name();
            let recorder = scheduler.trace();

            let bug = fault_from_scenario.or_else(|| scheduler_outcome_to_error(&outcome, i, scheduler.step_count()));

            let bug_found = bug.is_some();
            info!(target: "coyote::test", iteration = i, bug_found, steps = scheduler.step_count(), "iteration finished");
            scheduler.finish_iteration(bug_found);
            drop(scheduler);
            drop(runtime);

            if let Some(err) = bug {
                let outcome_tag = TraceOutcome::Bug(err.to_string());
                let trace = Trace::from_recorder(&recorder, strategy_name, seed, outcome_tag);
                if let Some(report) = BugReport::from_error(&err, i, Some(&trace)) {
                    return Ok(EngineOutcome::BugFound {
                        report,
                        iterations_run: i + 1,
                    });
                }
                // `Unfair` with no hot monitor: not a bug, continue exploring.
            }
        }

        Ok(EngineOutcome::NoBug {
            iterations_run: iteration_cap,
        })
    }

    fn spawn_liveness_sampler(
        &self,
        runtime: &RuntimeHandle,
        iteration: usize,
        done: Arc<AtomicBool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.cycle_detection {
            return None;
        }
        let runtime = runtime.clone();
        let hot_dwell_threshold = self.config.liveness_threshold;
        let cycle_threshold = self.config.cycle_detection_threshold;
        Some(tokio::spawn(async move {
            let group = GroupId::fresh();
            let op = runtime.scheduler().register(OperationId::fresh(), group, None);
            op.schedule_next().await;
            let mut checker = LivenessChecker::new(hot_dwell_threshold).with_cycle_threshold(cycle_threshold);
            loop {
                if done.load(Ordering::SeqCst) {
                    op.complete().await;
                    return;
                }
                let fault = Fault::new(iteration, runtime.step_count());
                if let Err(err) = checker.observe(&runtime, fault) {
                    runtime.record_fault(err);
                    op.complete().await;
                    return;
                }
                op.schedule_next().await;
            }
        }))
    }
}

/// Derive a per-iteration seed from the base seed so a run is
/// reproducible end to end without every iteration drawing from the
/// identical sequence.
fn derive_seed(base: u64, iteration: u64) -> u64 {
    base.wrapping_add(iteration.wrapping_mul(0x9E3779B97F4A7C15))
}

fn scheduler_outcome_to_error(outcome: &FinishOutcome, iteration: usize, step: u64) -> Option<CoyoteError> {
    match outcome {
        FinishOutcome::Done => None,
        FinishOutcome::Deadlock { remaining } => Some(CoyoteError::Deadlock {
            remaining: *remaining,
            fault: Fault::new(iteration, step),
        }),
        FinishOutcome::Unfair { steps } => Some(CoyoteError::Unfair { steps: *steps }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_varies_by_iteration() {
        let a = derive_seed(7, 0);
        let b = derive_seed(7, 1);
        assert_ne!(a, b);
        assert_eq!(derive_seed(7, 0), derive_seed(7, 0));
    }

    #[tokio::test]
    async fn no_bug_scenario_completes_cleanly() {
        let config = RuntimeConfig {
            iterations: 3,
            max_steps: 100,
            ..Default::default()
        };
        let engine = Engine::new(config);
        let outcome = engine
            .run(|_runtime| async move { Ok(()) })
            .await
            .unwrap();
        match outcome {
            EngineOutcome::NoBug { iterations_run } => assert_eq!(iterations_run, 3),
            EngineOutcome::BugFound { .. } => panic!("expected no bug"),
        }
    }

    #[tokio::test]
    async fn assertion_failure_is_reported_as_a_bug() {
        let config = RuntimeConfig {
            iterations: 5,
            max_steps: 100,
            ..Default::default()
        };
        let engine = Engine::new(config);
        let outcome = engine
            .run(|_runtime| async move {
                Err(CoyoteError::AssertionFailure {
                    message: "boom".into(),
                    fault: Fault::default(),
                })
            })
            .await
            .unwrap();
        match outcome {
            EngineOutcome::BugFound { report, .. } => {
                assert_eq!(report.kind, crate::report::BugKind::AssertionFailure);
            }
            EngineOutcome::NoBug { .. } => panic!("expected a bug"),
        }
    }
}
