//! Engine configuration: the knobs spec.md §6 exposes, loadable from a
//! JSON file on disk with every field defaulted so a partial file is
//! still valid.

use serde::{Deserialize, Serialize};

use crate::error::{CoyoteError, Fault, Result};

/// Which built-in strategy to run an iteration under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyChoice {
    Random,
    Dfs,
    Pct { depth: usize },
    Replay { trace_path: String },
}

impl Default for StrategyChoice {
    fn default() -> Self {
        StrategyChoice::Random
    }
}

/// How much detail the process emits while testing. Maps onto
/// `tracing` verbosity in `coyote-cli::logging`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Normal
    }
}

fn default_iterations() -> usize {
    1000
}

fn default_max_steps() -> u64 {
    10_000
}

fn default_liveness_threshold() -> u32 {
    100
}

fn default_cycle_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// The full set of per-run options from spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Number of test iterations to run per engine invocation.
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Per-iteration cap on scheduling decisions. Steps past the cap
    /// count as an unfair termination rather than a bug.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Strategy selection and its parameters.
    #[serde(default)]
    pub strategy: StrategyChoice,

    /// Seed for the first iteration; later iterations derive theirs
    /// from it deterministically so a run is reproducible end to end.
    #[serde(default)]
    pub seed: u64,

    /// Hot-state temperature budget before a monitor reports a
    /// liveness violation on its own (independent of cycle detection).
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold: u32,

    /// Snapshot recurrence count that marks a schedule as a
    /// non-progressing cycle.
    #[serde(default = "default_cycle_threshold")]
    pub cycle_detection_threshold: u32,

    /// Whether cycle detection runs at all; disabling it means only
    /// each monitor's own dwell-time counter can report liveness bugs.
    #[serde(default = "default_true")]
    pub cycle_detection: bool,

    /// Whether user-contributed state (`HashedState`) folds into the
    /// snapshot hash used for cycle detection.
    #[serde(default)]
    pub user_state_hashing: bool,

    #[serde(default)]
    pub verbosity: Verbosity,

    /// Whether log output goes to the console as well as wherever the
    /// embedding process's `tracing` subscriber routes it.
    #[serde(default = "default_true")]
    pub console_logging: bool,

    /// If every iteration up to `iterations` completes with no bug,
    /// keep running past the configured count under a fuzzing-style
    /// (non-exhaustive, time-boxed) extension instead of stopping.
    /// Off by default; §6 lists it as an available knob, not a default.
    #[serde(default)]
    pub fallback_to_fuzzing: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            max_steps: default_max_steps(),
            strategy: StrategyChoice::default(),
            seed: 0,
            liveness_threshold: default_liveness_threshold(),
            cycle_detection_threshold: default_cycle_threshold(),
            cycle_detection: true,
            user_state_hashing: false,
            verbosity: Verbosity::default(),
            console_logging: true,
            fallback_to_fuzzing: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from its JSON text, reporting malformed input as
    /// a usage error rather than panicking the caller.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CoyoteError::UsageError {
            message: format!("malformed runtime config: {e}"),
            fault: Fault::default(),
        })
    }

    /// Merge `override_cfg` on top of `self`, field by field, used to
    /// layer a project-level config file over a user-level one, and
    /// CLI flags over both.
    pub fn merged_with(self, override_cfg: PartialRuntimeConfig) -> Self {
        RuntimeConfig {
            iterations: override_cfg.iterations.unwrap_or(self.iterations),
            max_steps: override_cfg.max_steps.unwrap_or(self.max_steps),
            strategy: override_cfg.strategy.unwrap_or(self.strategy),
            seed: override_cfg.seed.unwrap_or(self.seed),
            liveness_threshold: override_cfg.liveness_threshold.unwrap_or(self.liveness_threshold),
            cycle_detection_threshold: override_cfg
                .cycle_detection_threshold
                .unwrap_or(self.cycle_detection_threshold),
            cycle_detection: override_cfg.cycle_detection.unwrap_or(self.cycle_detection),
            user_state_hashing: override_cfg.user_state_hashing.unwrap_or(self.user_state_hashing),
            verbosity: override_cfg.verbosity.unwrap_or(self.verbosity),
            console_logging: override_cfg.console_logging.unwrap_or(self.console_logging),
            fallback_to_fuzzing: override_cfg.fallback_to_fuzzing.unwrap_or(self.fallback_to_fuzzing),
        }
    }
}

/// Same shape as [`RuntimeConfig`] but every field optional, for
/// layering a project config (or CLI flags) over a base one without
/// a partial file forcing every field present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartialRuntimeConfig {
    pub iterations: Option<usize>,
    pub max_steps: Option<u64>,
    pub strategy: Option<StrategyChoice>,
    pub seed: Option<u64>,
    pub liveness_threshold: Option<u32>,
    pub cycle_detection_threshold: Option<u32>,
    pub cycle_detection: Option<bool>,
    pub user_state_hashing: Option<bool>,
    pub verbosity: Option<Verbosity>,
    pub console_logging: Option<bool>,
    pub fallback_to_fuzzing: Option<bool>,
}

impl PartialRuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CoyoteError::UsageError {
            message: format!("malformed runtime config override: {e}"),
            fault: Fault::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = RuntimeConfig::from_json(r#"{"iterations": 50}"#).unwrap();
        assert_eq!(cfg.iterations, 50);
        assert_eq!(cfg.max_steps, default_max_steps());
        assert_eq!(cfg.strategy, StrategyChoice::Random);
    }

    #[test]
    fn override_layers_on_top_of_base() {
        let base = RuntimeConfig::default();
        let over = PartialRuntimeConfig {
            seed: Some(42),
            ..Default::default()
        };
        let merged = base.merged_with(over);
        assert_eq!(merged.seed, 42);
        assert_eq!(merged.iterations, default_iterations());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json("not json").is_err());
    }
}
