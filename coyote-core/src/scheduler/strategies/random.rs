//! Uniform-random strategy over the enabled set, driven by a seeded PRNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::id::OperationId;
use crate::scheduler::Strategy;

/// Picks uniformly among enabled operations; nondeterministic choices are
/// uniform draws from the same generator.
pub struct RandomStrategy {
    rng: StdRng,
    seed: u64,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }
}

impl Strategy for RandomStrategy {
    fn pick_next(&mut self, enabled: &[OperationId], _context: u64) -> OperationId {
        debug_assert!(!enabled.is_empty());
        let idx = self.rng.gen_range(0..enabled.len());
        enabled[idx]
    }

    fn next_bool(&mut self, _fair: bool) -> bool {
        self.rng.gen_bool(0.5)
    }

    fn next_int(&mut self, limit: u64) -> u64 {
        if limit == 0 {
            0
        } else {
            self.rng.gen_range(0..limit)
        }
    }

    fn on_iteration_start(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.seed = seed;
    }

    fn on_iteration_end(&mut self, _bug_found: bool) {}

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let ops = vec![OperationId::from_raw(1), OperationId::from_raw(2), OperationId::from_raw(3)];
        let mut a = RandomStrategy::new(7);
        let mut b = RandomStrategy::new(7);
        let seq_a: Vec<_> = (0..10).map(|_| a.pick_next(&ops, 0)).collect();
        let seq_b: Vec<_> = (0..10).map(|_| b.pick_next(&ops, 0)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn int_respects_limit() {
        let mut s = RandomStrategy::new(1);
        for _ in 0..100 {
            assert!(s.next_int(5) < 5);
        }
        assert_eq!(s.next_int(0), 0);
    }
}
