//! PCT-like prioritized strategy: assigns random priorities to operation
//! groups, demotes the highest-priority group at a handful of randomly
//! chosen step indices, and ties break by operation id.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::id::{GroupId, OperationId};
use crate::scheduler::Strategy;

pub struct PctStrategy {
    rng: StdRng,
    /// Priority order, highest-priority group first.
    priority_order: Vec<GroupId>,
    group_of: HashMap<OperationId, GroupId>,
    /// Step indices (within this iteration) at which the current
    /// highest-priority group is demoted to the back of the order.
    change_points: Vec<u64>,
    depth: usize,
    step: u64,
}

impl PctStrategy {
    /// `depth` is the number of priority-change points per iteration
    /// (the "bug depth" parameter from the PCT algorithm).
    pub fn new(seed: u64, depth: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            priority_order: Vec::new(),
            group_of: HashMap::new(),
            change_points: Vec::new(),
            depth: depth.max(1),
            step: 0,
        }
    }

    fn priority_rank(&self, group: GroupId) -> usize {
        self.priority_order
            .iter()
            .position(|g| *g == group)
            .unwrap_or(self.priority_order.len())
    }

    fn maybe_demote(&mut self) {
        if self.change_points.contains(&self.step) && !self.priority_order.is_empty() {
            let top = self.priority_order.remove(0);
            self.priority_order.push(top);
        }
    }
}

impl Strategy for PctStrategy {
    fn pick_next(&mut self, enabled: &[OperationId], _context: u64) -> OperationId {
        debug_assert!(!enabled.is_empty());
        self.maybe_demote();
        self.step += 1;

        let mut best = enabled[0];
        let mut best_rank = self.priority_rank(self.group_of.get(&best).copied().unwrap_or_else(GroupId::fresh));
        for &candidate in &enabled[1..] {
            let group = self.group_of.get(&candidate).copied().unwrap_or_else(GroupId::fresh);
            let rank = self.priority_rank(group);
            if rank < best_rank || (rank == best_rank && candidate.raw() < best.raw()) {
                best = candidate;
                best_rank = rank;
            }
        }
        best
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
        self.step = 0;
        let mut groups: Vec<GroupId> = self.group_of.values().copied().collect();
        groups.sort_by_key(|g| g.raw());
        groups.dedup();
        // Fisher-Yates over the known groups so far; groups discovered
        // mid-iteration are appended at lowest priority as they appear.
        for i in (1..groups.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            groups.swap(i, j);
        }
        self.priority_order = groups;
        self.change_points = (0..self.depth.saturating_sub(1))
            .map(|_| self.rng.gen_range(0..1000))
            .collect();
        self.change_points.sort_unstable();
    }

    fn on_iteration_end(&mut self, _bug_found: bool) {}

    fn name(&self) -> &'static str {
        "pct"
    }

    fn on_operation_created(&mut self, op: OperationId, group: GroupId) {
        self.group_of.insert(op, group);
        if !self.priority_order.contains(&group) {
            self.priority_order.push(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_by_operation_id() {
        let mut s = PctStrategy::new(1, 1);
        let g = GroupId::fresh();
        let a = OperationId::from_raw(10);
        let b = OperationId::from_raw(20);
        s.on_operation_created(a, g);
        s.on_operation_created(b, g);
        s.on_iteration_start(1);
        let picked = s.pick_next(&[b, a], 0);
        assert_eq!(picked, a);
    }
}
