//! Specification monitors: state machines that only observe events, never
//! own operations, and carry a hot/cold/neutral temperature per state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::actor::handler::StateId;
use crate::error::{CoyoteError, Fault, Result};
use crate::event::Event;

/// A monitor state's liveness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temperature {
    /// A liveness goal is outstanding while in this state.
    Hot,
    /// The liveness goal is satisfied.
    Cold,
    /// Neither; doesn't factor into liveness checking.
    Neutral,
}

/// What a monitor event handler can do: run a closure (which may request
/// a transition via [`MonitorContext::goto`]) or transition directly.
#[derive(Clone)]
pub enum MonitorAction {
    Action(Arc<dyn Fn(&mut MonitorContext, &Event) -> Result<()> + Send + Sync>),
    Goto(StateId),
}

#[derive(Default)]
pub struct MonitorContext {
    pending_goto: Option<StateId>,
}

impl MonitorContext {
    pub fn goto(&mut self, target: impl Into<StateId>) {
        self.pending_goto = Some(target.into());
    }
}

struct MonitorStateDef {
    temperature: Temperature,
    handlers: HashMap<String, MonitorAction>,
}

/// The immutable declared shape of one monitor type.
pub struct MonitorDef {
    states: HashMap<StateId, MonitorStateDef>,
    start: StateId,
}

impl MonitorDef {
    pub fn start(&self) -> &StateId {
        &self.start
    }
}

pub struct MonitorStateBuilder {
    temperature: Temperature,
    handlers: HashMap<String, MonitorAction>,
}

impl MonitorStateBuilder {
    fn new() -> Self {
        Self {
            temperature: Temperature::Neutral,
            handlers: HashMap::new(),
        }
    }

    pub fn hot(mut self) -> Self {
        self.temperature = Temperature::Hot;
        self
    }

    pub fn cold(mut self) -> Self {
        self.temperature = Temperature::Cold;
        self
    }

    pub fn goto(mut self, tag: impl Into<String>, target: impl Into<StateId>) -> Self {
        self.handlers.insert(tag.into(), MonitorAction::Goto(target.into()));
        self
    }

    pub fn on_event<F>(mut self, tag: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut MonitorContext, &Event) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(tag.into(), MonitorAction::Action(Arc::new(handler)));
        self
    }
}

pub struct MonitorBuilder {
    start: StateId,
    states: HashMap<StateId, MonitorStateDef>,
}

impl MonitorBuilder {
    pub fn new(start: impl Into<StateId>) -> Self {
        Self {
            start: start.into(),
            states: HashMap::new(),
        }
    }

    pub fn state<F>(mut self, id: impl Into<StateId>, build: F) -> Self
    where
        F: FnOnce(MonitorStateBuilder) -> MonitorStateBuilder,
    {
        let built = build(MonitorStateBuilder::new());
        self.states.insert(
            id.into(),
            MonitorStateDef {
                temperature: built.temperature,
                handlers: built.handlers,
            },
        );
        self
    }

    pub fn build(self) -> Result<MonitorDef> {
        if !self.states.contains_key(&self.start) {
            return Err(CoyoteError::UsageError {
                message: format!("monitor start state '{}' was never declared", self.start),
                fault: Fault::default(),
            });
        }
        Ok(MonitorDef {
            states: self.states,
            start: self.start,
        })
    }
}

/// A live monitor instance: current state plus the hot-temperature
/// counter the liveness checker consults.
pub struct Monitor {
    def: Arc<MonitorDef>,
    current: StateId,
    hot_steps: u32,
}

impl Monitor {
    pub fn new(def: Arc<MonitorDef>) -> Self {
        let current = def.start().clone();
        Self {
            def,
            current,
            hot_steps: 0,
        }
    }

    /// Dispatch an event. An event with no mapping in the current state
    /// is a no-op — notifying a monitor about something it doesn't care
    /// about never changes its state.
    pub fn handle(&mut self, event: &Event, fault: Fault) -> Result<()> {
        let state = self
            .def
            .states
            .get(&self.current)
            .expect("monitor always occupies a declared state");
        let Some(action) = state.handlers.get(event.tag()) else {
            return Ok(());
        };
        match action.clone() {
            MonitorAction::Goto(target) => {
                self.current = target;
                self.hot_steps = 0;
            }
            MonitorAction::Action(handler) => {
                let mut ctx = MonitorContext::default();
                handler(&mut ctx, event)?;
                if let Some(target) = ctx.pending_goto {
                    self.current = target;
                    self.hot_steps = 0;
                }
            }
        }
        let _ = fault;
        Ok(())
    }

    pub fn is_hot(&self) -> bool {
        matches!(
            self.def.states.get(&self.current).map(|s| s.temperature),
            Some(Temperature::Hot)
        )
    }

    /// Called once per scheduling point by the liveness checker. Returns
    /// a violation once the hot-state dwell time crosses `threshold`.
    pub fn tick(&mut self, threshold: u32, fault: Fault) -> Option<CoyoteError> {
        if self.is_hot() {
            self.hot_steps += 1;
            if self.hot_steps > threshold {
                return Some(CoyoteError::LivenessViolation {
                    message: format!(
                        "monitor stayed hot in state '{}' for {} steps (threshold {threshold})",
                        self.current, self.hot_steps
                    ),
                    fault,
                });
            }
        } else {
            self.hot_steps = 0;
        }
        None
    }

    pub fn current_state(&self) -> &StateId {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhandled_event_is_a_no_op() {
        let def = Arc::new(
            MonitorBuilder::new("Hot")
                .state("Hot", |s| s.hot().goto("cool", "Cold"))
                .state("Cold", |s| s.cold())
                .build()
                .unwrap(),
        );
        let mut monitor = Monitor::new(def);
        monitor.handle(&Event::new("irrelevant"), Fault::default()).unwrap();
        assert!(monitor.is_hot());
    }

    #[test]
    fn crossing_threshold_is_a_violation() {
        let def = Arc::new(
            MonitorBuilder::new("Hot")
                .state("Hot", |s| s.hot())
                .build()
                .unwrap(),
        );
        let mut monitor = Monitor::new(def);
        let mut violation = None;
        for _ in 0..5 {
            violation = monitor.tick(3, Fault::default());
        }
        assert!(violation.is_some());
    }
}
