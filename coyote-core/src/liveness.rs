//! Cycle detection for the random and PCT strategies, which have no
//! notion of "we've been here before" on their own.
//!
//! Each scheduling point contributes a [`RuntimeHandle::snapshot_hash`]
//! fingerprint. When the same fingerprint recurs often enough while a
//! monitor is hot, the schedule is assumed to be looping without making
//! liveness progress, and we nudge the next fair coin flip to try to
//! break out of it before finally reporting the violation.

use std::collections::HashMap;

use crate::error::{CoyoteError, Fault, Result};
use crate::runtime::RuntimeHandle;

/// How many times a fingerprint may recur before it's treated as a
/// non-progressing cycle.
const DEFAULT_CYCLE_THRESHOLD: u32 = 3;

/// Tracks fingerprint recurrence across an iteration and drives the
/// fairness oracle once a cycle is suspected.
pub struct LivenessChecker {
    seen: HashMap<u64, u32>,
    cycle_threshold: u32,
    hot_dwell_threshold: u32,
    nudged_this_cycle: bool,
}

impl LivenessChecker {
    pub fn new(hot_dwell_threshold: u32) -> Self {
        Self {
            seen: HashMap::new(),
            cycle_threshold: DEFAULT_CYCLE_THRESHOLD,
            hot_dwell_threshold,
            nudged_this_cycle: false,
        }
    }

    pub fn with_cycle_threshold(mut self, threshold: u32) -> Self {
        self.cycle_threshold = threshold;
        self
    }

    /// Reset recurrence counts for a fresh iteration; fingerprints from a
    /// previous run of the same schedule must not bleed into the next.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.nudged_this_cycle = false;
    }

    /// Take a snapshot, tick every monitor's hot-dwell counter, and check
    /// for a non-progressing cycle. Returns the first violation found, in
    /// the order: monitor dwell timeout, then stuck-cycle-while-hot.
    pub fn observe(&mut self, runtime: &RuntimeHandle, fault: Fault) -> Result<()> {
        if let Some(err) = runtime.tick_monitor_temperature(self.hot_dwell_threshold) {
            return Err(err);
        }

        let any_hot = runtime.monitor_snapshot().iter().any(|(_, hot)| *hot);
        if !any_hot {
            self.nudged_this_cycle = false;
            return Ok(());
        }

        let fingerprint = runtime.snapshot_hash(None);
        let count = self.seen.entry(fingerprint).or_insert(0);
        *count += 1;

        if *count >= self.cycle_threshold {
            if !self.nudged_this_cycle {
                // Try flipping a fair choice before giving up on this cycle.
                runtime.force_fair_flip(true);
                self.nudged_this_cycle = true;
                return Ok(());
            }
            return Err(CoyoteError::LivenessViolation {
                message: format!(
                    "schedule revisited the same program state {count} times while a monitor was hot"
                ),
                fault,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_checker_reports_nothing() {
        let mut checker = LivenessChecker::new(10).with_cycle_threshold(2);
        checker.reset();
        assert_eq!(checker.seen.len(), 0);
    }
}
