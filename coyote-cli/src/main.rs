//! Command-line driver for the coyote-core testing engine.
//!
//! `coyote test --scenario <name>` runs a registered in-process scenario
//! for up to `--iterations` rounds under the chosen strategy, reporting
//! the first bug found. `coyote replay <trace-file>` re-runs a captured
//! trace under the deterministic replay strategy. `coyote list-scenarios`
//! prints the built-in registry.

mod config;
mod error;
mod logging;
mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use coyote_core::config::StrategyChoice;
use coyote_core::{BugReport, Engine, EngineOutcome, RuntimeConfig};

use error::CliError;

#[derive(Parser)]
#[command(name = "coyote")]
#[command(about = "Systematic concurrency testing for cooperatively scheduled programs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registered scenario for up to `--iterations` rounds
    Test {
        /// Name of a registered scenario (see `list-scenarios`)
        #[arg(long)]
        scenario: String,

        #[arg(long)]
        iterations: Option<usize>,

        /// One of: random, dfs, pct
        #[arg(long)]
        strategy: Option<String>,

        /// PCT priority-change depth; only meaningful with `--strategy pct`
        #[arg(long, default_value_t = 3)]
        pct_depth: usize,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        max_steps: Option<u64>,

        /// Force every decision from a previously recorded trace file
        /// instead of the chosen strategy
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Re-run a captured trace file under the replay strategy
    Replay {
        file: PathBuf,

        /// Which registered scenario produced this trace
        #[arg(long)]
        scenario: String,

        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the built-in scenario registry
    ListScenarios,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("coyote: {err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let base_config = config::load()?;

    match cli.command {
        Commands::ListScenarios => {
            for scenario in scenarios::registry() {
                println!("{:<20} {}", scenario.name, scenario.description);
            }
            Ok(0)
        }
        Commands::Test {
            scenario,
            iterations,
            strategy,
            pct_depth,
            seed,
            max_steps,
            replay,
            format,
        } => {
            let strategy_choice = resolve_strategy(strategy, pct_depth, replay)?;
            let mut runtime_config = base_config;
            if let Some(iterations) = iterations {
                runtime_config.iterations = iterations;
            }
            if let Some(max_steps) = max_steps {
                runtime_config.max_steps = max_steps;
            }
            if let Some(seed) = seed {
                runtime_config.seed = seed;
            }
            runtime_config.strategy = strategy_choice;

            logging::init(runtime_config.verbosity, runtime_config.console_logging);

            let scenario_def = scenarios::lookup(&scenario)
                .ok_or_else(|| CliError::Usage(format!("no scenario registered as '{scenario}'")))?;

            run_engine(runtime_config, scenario_def, &format).await
        }
        Commands::Replay { file, scenario, format } => {
            let mut runtime_config = base_config;
            runtime_config.iterations = 1;
            runtime_config.strategy = StrategyChoice::Replay {
                trace_path: file.to_string_lossy().into_owned(),
            };
            logging::init(runtime_config.verbosity, runtime_config.console_logging);

            let scenario_def = scenarios::lookup(&scenario)
                .ok_or_else(|| CliError::Usage(format!("no scenario registered as '{scenario}'")))?;

            run_engine(runtime_config, scenario_def, &format).await
        }
    }
}

fn resolve_strategy(
    strategy: Option<String>,
    pct_depth: usize,
    replay: Option<PathBuf>,
) -> Result<StrategyChoice, CliError> {
    if let Some(path) = replay {
        return Ok(StrategyChoice::Replay {
            trace_path: path.to_string_lossy().into_owned(),
        });
    }
    match strategy.as_deref() {
        None | Some("random") => Ok(StrategyChoice::Random),
        Some("dfs") => Ok(StrategyChoice::Dfs),
        Some("pct") => Ok(StrategyChoice::Pct { depth: pct_depth }),
        Some(other) => Err(CliError::Usage(format!("unknown strategy '{other}'"))),
    }
}

async fn run_engine(
    runtime_config: RuntimeConfig,
    scenario_def: scenarios::Scenario,
    format: &str,
) -> Result<i32, CliError> {
    let engine = Engine::new(runtime_config);
    let outcome = engine
        .run(move |rt| (scenario_def.run)(rt))
        .await
        .map_err(CliError::from)?;

    match outcome {
        EngineOutcome::NoBug { iterations_run } => {
            println!("no bug found after {iterations_run} iterations");
            Ok(0)
        }
        EngineOutcome::BugFound { report, iterations_run } => {
            print_report(&report, format);
            println!("bug found after {iterations_run} iterations");
            Ok(1)
        }
    }
}

fn print_report(report: &BugReport, format: &str) {
    if format == "json" {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("coyote: failed to serialize report: {err}"),
        }
        return;
    }
    println!("[coyote::report] {} at iteration {} step {}", report.kind.tag(), report.iteration, report.step);
    println!("  {}", report.message);
    if let Some(trace) = &report.trace_text {
        println!("--- trace ---");
        println!("{trace}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_strategy_name_defaults_to_random() {
        let choice = resolve_strategy(None, 3, None).unwrap();
        assert_eq!(choice, StrategyChoice::Random);
    }

    #[test]
    fn named_strategies_resolve_to_their_variant() {
        assert_eq!(resolve_strategy(Some("dfs".into()), 3, None).unwrap(), StrategyChoice::Dfs);
        assert_eq!(
            resolve_strategy(Some("pct".into()), 5, None).unwrap(),
            StrategyChoice::Pct { depth: 5 }
        );
    }

    #[test]
    fn an_unknown_strategy_name_is_a_usage_error() {
        let err = resolve_strategy(Some("quantum".into()), 3, None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn replay_path_overrides_any_named_strategy() {
        let path = PathBuf::from("trace.json");
        let choice = resolve_strategy(Some("dfs".into()), 3, Some(path.clone())).unwrap();
        match choice {
            StrategyChoice::Replay { trace_path } => assert_eq!(trace_path, path.to_string_lossy()),
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn an_unregistered_scenario_name_is_a_usage_error() {
        let cli = Cli {
            command: Commands::Test {
                scenario: "does-not-exist".into(),
                iterations: Some(1),
                strategy: None,
                pct_depth: 3,
                seed: None,
                max_steps: None,
                replay: None,
                format: "text".into(),
            },
        };
        let err = run(cli).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn running_a_registered_scenario_to_no_bug_exits_zero() {
        let cli = Cli {
            command: Commands::Test {
                scenario: "fair-termination".into(),
                iterations: Some(2),
                strategy: None,
                pct_depth: 3,
                seed: Some(1),
                max_steps: Some(1_000),
                replay: None,
                format: "text".into(),
            },
        };
        assert_eq!(run(cli).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn running_a_scenario_that_reports_a_bug_exits_one() {
        let cli = Cli {
            command: Commands::Test {
                scenario: "unbalanced-pop".into(),
                iterations: Some(2),
                strategy: None,
                pct_depth: 3,
                seed: Some(1),
                max_steps: Some(500),
                replay: None,
                format: "text".into(),
            },
        };
        assert_eq!(run(cli).await.unwrap(), 1);
    }
}
