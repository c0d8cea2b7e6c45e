//! The per-actor inbox: an ordered envelope queue with deferral.
//!
//! Dequeue never simply pops the head. It walks forward looking for the
//! first envelope that is neither ignored-and-dropped nor deferred,
//! leaving deferred envelopes in place for a later dequeue attempt (spec
//! §4.2's decision order).

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use crate::event::Envelope;

/// What to do with the envelope at a given index, decided by the caller
/// (the dispatcher) by consulting the current state's handler table.
pub enum Disposition {
    /// Drop it; `true` means it was must-handle (a violation).
    Drop { must_handle_violation: bool },
    /// Leave it queued, keep scanning.
    Defer,
    /// Remove it and hand it to the caller for dispatch.
    Take,
}

/// A FIFO inbox. Producers only append; only the owning actor removes.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    envelopes: VecDeque<Envelope>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.envelopes.push_back(envelope);
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Scan from the head, asking `classify` what to do with each
    /// envelope in turn. Returns the taken envelope, or `None` if every
    /// envelope was deferred (or the inbox was empty). Dropped envelopes
    /// are removed as the scan passes them; the caller is told whether
    /// any drop was a must-handle violation via `on_drop`.
    pub fn try_dequeue<C, D>(&mut self, mut classify: C, mut on_drop: D) -> Option<Envelope>
    where
        C: FnMut(&Envelope) -> Disposition,
        D: FnMut(&Envelope, bool),
    {
        let mut idx = 0;
        while idx < self.envelopes.len() {
            let disposition = classify(&self.envelopes[idx]);
            match disposition {
                Disposition::Defer => {
                    idx += 1;
                }
                Disposition::Drop { must_handle_violation } => {
                    let env = self.envelopes.remove(idx).expect("index in bounds");
                    on_drop(&env, must_handle_violation);
                }
                Disposition::Take => {
                    return self.envelopes.remove(idx);
                }
            }
        }
        None
    }

    /// Drain every remaining envelope in order, e.g. while halting.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.envelopes.drain(..).collect()
    }

    /// A structural hash contributing to the liveness cycle-detection
    /// snapshot: sensitive to queue length and each envelope's tag and
    /// must-handle flag, not to payload contents (payload equality would
    /// make the snapshot space unboundedly large for data-carrying events).
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.envelopes.len().hash(&mut hasher);
        for env in &self.envelopes {
            env.event.tag().hash(&mut hasher);
            env.must_handle.hash(&mut hasher);
        }
        hasher.finish()
    }
}
