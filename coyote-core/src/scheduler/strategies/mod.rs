//! Built-in scheduling strategies (spec.md §4.4).

pub mod dfs;
pub mod pct;
pub mod random;
pub mod replay;

pub use dfs::DfsStrategy;
pub use pct::PctStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;
