//! The actor/state-machine runtime: hierarchical states, a declarative
//! handler table built once at construction, and the dispatch loop that
//! drives an actor's inbox.
//!
//! Per the redesign notes, there is no reflection here: a
//! [`handler::StateMachineDef`] is plain data, assembled by a builder, and
//! the dispatch loop in [`dispatch`] is the only code that interprets it.

pub mod dispatch;
pub mod handler;
pub mod machine;

pub use dispatch::run_actor;
pub use handler::{EventAction, StateDef, StateId, StateMachineBuilder, StateMachineDef};
pub use machine::{ActorContext, ActorLifecycle, ActorMachine, OnExceptionAction};
