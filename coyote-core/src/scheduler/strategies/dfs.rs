//! Exhaustive depth-first strategy: backtracks the exact decision points
//! of the previous iteration to explore the next untried branch.
//!
//! Limitation, noted rather than hidden: if the set of enabled operations
//! at a given decision index differs from the previous iteration (because
//! an earlier, newly-explored branch changed program behavior), a replayed
//! index is clamped into range rather than re-derived structurally. Full
//! structural DFS over divergent schedules is future work; see DESIGN.md.

use crate::id::OperationId;
use crate::scheduler::Strategy;

#[derive(Debug, Clone)]
enum Frame {
    Op { count: usize, chosen: usize },
    Bool { chosen: usize },
    Int { limit: u64, chosen: u64 },
}

impl Frame {
    fn has_more(&self) -> bool {
        match self {
            Frame::Op { count, chosen } => chosen + 1 < *count,
            Frame::Bool { chosen } => *chosen == 0,
            Frame::Int { limit, chosen } => chosen + 1 < *limit,
        }
    }

    fn bumped(&self) -> Frame {
        match self {
            Frame::Op { count, chosen } => Frame::Op {
                count: *count,
                chosen: chosen + 1,
            },
            Frame::Bool { .. } => Frame::Bool { chosen: 1 },
            Frame::Int { limit, chosen } => Frame::Int {
                limit: *limit,
                chosen: chosen + 1,
            },
        }
    }
}

pub struct DfsStrategy {
    /// The decision path being recorded this iteration.
    path: Vec<Frame>,
    /// The forced prefix for this iteration, carried over from the
    /// previous iteration's backtrack point.
    replay: Vec<Frame>,
    cursor: usize,
    exhausted: bool,
}

impl DfsStrategy {
    pub fn new() -> Self {
        Self {
            path: Vec::new(),
            replay: Vec::new(),
            cursor: 0,
            exhausted: false,
        }
    }

    fn forced(&mut self) -> Option<Frame> {
        if self.cursor < self.replay.len() {
            let frame = self.replay[self.cursor].clone();
            self.cursor += 1;
            Some(frame)
        } else {
            None
        }
    }
}

impl Default for DfsStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for DfsStrategy {
    fn pick_next(&mut self, enabled: &[OperationId], _context: u64) -> OperationId {
        debug_assert!(!enabled.is_empty());
        let chosen = match self.forced() {
            Some(Frame::Op { chosen, .. }) => chosen.min(enabled.len() - 1),
            _ => 0,
        };
        self.path.push(Frame::Op {
            count: enabled.len(),
            chosen,
        });
        enabled[chosen]
    }

    fn next_bool(&mut self, _fair: bool) -> bool {
        let chosen = match self.forced() {
            Some(Frame::Bool { chosen }) => chosen,
            _ => 0,
        };
        self.path.push(Frame::Bool { chosen });
        chosen == 1
    }

    fn next_int(&mut self, limit: u64) -> u64 {
        if limit == 0 {
            self.path.push(Frame::Int { limit, chosen: 0 });
            return 0;
        }
        let chosen = match self.forced() {
            Some(Frame::Int { chosen, .. }) => chosen.min(limit - 1),
            _ => 0,
        };
        self.path.push(Frame::Int { limit, chosen });
        chosen
    }

    fn on_iteration_start(&mut self, _seed: u64) {
        self.path.clear();
        self.cursor = 0;
    }

    fn on_iteration_end(&mut self, _bug_found: bool) {
        // Find the rightmost frame with an untried alternative; replay
        // everything up to and including it, bumped, next time.
        let mut backtrack_at = None;
        for (i, frame) in self.path.iter().enumerate().rev() {
            if frame.has_more() {
                backtrack_at = Some(i);
                break;
            }
        }
        match backtrack_at {
            Some(i) => {
                let mut next_replay: Vec<Frame> = self.path[..i].to_vec();
                next_replay.push(self.path[i].bumped());
                self.replay = next_replay;
            }
            None => {
                self.exhausted = true;
                self.replay.clear();
            }
        }
    }

    fn name(&self) -> &'static str {
        "dfs"
    }
}

impl DfsStrategy {
    /// True once every reachable decision-index combination has been
    /// explored (no more untried alternatives anywhere on the last path).
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtracks_binary_choices_exhaustively() {
        let mut s = DfsStrategy::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            s.on_iteration_start(0);
            let a = s.next_bool(false);
            let b = s.next_bool(false);
            seen.insert((a, b));
            s.on_iteration_end(false);
        }
        assert_eq!(seen.len(), 4);
        assert!(s.is_exhausted());
    }
}
