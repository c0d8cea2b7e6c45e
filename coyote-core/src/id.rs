//! Identity types for the entities the runtime owns.
//!
//! Every id is a thin `u64` wrapper minted from a process-wide counter.
//! Ids are never reused within a run, which is what lets a
//! [`crate::trace::Trace`] reference an operation or actor unambiguously
//! after the run that produced it has ended.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($name:ident, $counter:ident, $prefix:literal) => {
        #[doc = concat!("Stable identifier for a ", $prefix, ".")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Mint a fresh, never-before-used id.
            pub fn fresh() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// The raw numeric value, for embedding in trace files and hashes.
            pub fn raw(self) -> u64 {
                self.0
            }

            /// Reconstruct an id from its raw value, e.g. when parsing a
            /// trace file. Does not reserve the value in the counter —
            /// callers that mix minted and reconstructed ids must keep
            /// them in separate namespaces.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(OperationId, OPERATION_COUNTER, "op");
id_type!(GroupId, GROUP_COUNTER, "group");
id_type!(ActorId, ACTOR_COUNTER, "actor");
id_type!(MonitorId, MONITOR_COUNTER, "monitor");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_display() {
        let a = OperationId::fresh();
        let b = OperationId::fresh();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("op#"));
    }
}
