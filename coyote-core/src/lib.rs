//! Systematic concurrency testing: a cooperative scheduler, an
//! actor/state-machine dispatcher, specification monitors, and a
//! liveness checker, driven by a pluggable [`scheduler::Strategy`] and
//! replayable through a recorded [`trace::Trace`].
//!
//! The public entry point for test authors is [`engine::Engine`]: build
//! a [`config::RuntimeConfig`], hand it a scenario closure that spawns
//! actors against the [`runtime::RuntimeHandle`] it receives, and read
//! back an [`engine::EngineOutcome`].

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod id;
pub mod liveness;
pub mod monitor;
pub mod operation;
pub mod queue;
pub mod report;
pub mod runtime;
pub mod scheduler;
pub mod trace;

pub use actor::{StateMachineBuilder, StateMachineDef};
pub use config::RuntimeConfig;
pub use engine::{Engine, EngineOutcome};
pub use error::{CoyoteError, Fault, Result};
pub use event::{Envelope, Event};
pub use id::{ActorId, GroupId, MonitorId, OperationId};
pub use monitor::{Monitor, MonitorBuilder, MonitorContext, MonitorDef, Temperature};
pub use operation::{Operation, OperationStatus};
pub use report::{BugKind, BugReport};
pub use runtime::{current_operation, get_runtime, RuntimeHandle};
pub use trace::{Trace, TraceOutcome};
