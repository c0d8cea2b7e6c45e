//! Declarative per-state handler tables, assembled once when an actor
//! type is defined and never mutated afterward.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoyoteError, Fault, Result};
use crate::event::Event;

use super::machine::{ActorContext, OnExceptionAction};

/// Identifies a declared state by name. Two states with the same name
/// within one [`StateMachineDef`] are the same state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateId(String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        StateId::new(s)
    }
}

/// A handler body invoked for one (state, event tag) pair. Errors
/// propagate through `OnException`; transitions the body wants to make
/// (raise/goto/push/pop) are recorded on the context, not returned here —
/// see [`super::machine::PendingTransition`].
pub type HandlerFn = dyn Fn(&mut ActorContext, &Event) -> Result<()> + Send + Sync;

/// A lifecycle hook body, invoked with no event in hand.
pub type HookFn = dyn Fn(&mut ActorContext) -> Result<()> + Send + Sync;

/// What happens when an envelope whose tag matches is dequeued.
#[derive(Clone)]
pub enum EventAction {
    /// Run a handler body; it may request a transition via the context.
    Action(Arc<HandlerFn>),
    /// Unconditionally transition to another declared state.
    Goto(StateId),
    /// Push another declared state on top of the stack.
    Push(StateId),
    /// Leave the envelope at the head of the inbox; try the next one.
    Defer,
    /// Drop the envelope without dispatching it.
    Ignore,
}

/// One declared state: its parent (for handler-table fallback), its
/// entry/exit hooks, and its handler table.
#[derive(Clone)]
pub struct StateDef {
    pub id: StateId,
    pub parent: Option<StateId>,
    pub on_entry: Option<Arc<HookFn>>,
    pub on_exit: Option<Arc<HookFn>>,
    handlers: HashMap<String, EventAction>,
}

impl StateDef {
    /// Look up the action for `tag` in this state only (no parent walk).
    pub fn action_for(&self, tag: &str) -> Option<&EventAction> {
        self.handlers.get(tag)
    }
}

/// Builds one [`StateDef`] at a time; handed to the closure passed to
/// [`StateMachineBuilder::state`].
pub struct StateBuilder {
    id: StateId,
    parent: Option<StateId>,
    on_entry: Option<Arc<HookFn>>,
    on_exit: Option<Arc<HookFn>>,
    handlers: HashMap<String, EventAction>,
}

impl StateBuilder {
    fn new(id: StateId) -> Self {
        Self {
            id,
            parent: None,
            on_entry: None,
            on_exit: None,
            handlers: HashMap::new(),
        }
    }

    pub fn parent(mut self, parent: impl Into<StateId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn on_entry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ActorContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_entry = Some(Arc::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ActorContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    pub fn on_event<F>(mut self, tag: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut ActorContext, &Event) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(tag.into(), EventAction::Action(Arc::new(handler)));
        self
    }

    pub fn goto(mut self, tag: impl Into<String>, target: impl Into<StateId>) -> Self {
        self.handlers.insert(tag.into(), EventAction::Goto(target.into()));
        self
    }

    pub fn push(mut self, tag: impl Into<String>, target: impl Into<StateId>) -> Self {
        self.handlers.insert(tag.into(), EventAction::Push(target.into()));
        self
    }

    pub fn defer(mut self, tag: impl Into<String>) -> Self {
        self.handlers.insert(tag.into(), EventAction::Defer);
        self
    }

    pub fn ignore(mut self, tag: impl Into<String>) -> Self {
        self.handlers.insert(tag.into(), EventAction::Ignore);
        self
    }

    fn build(self) -> StateDef {
        StateDef {
            id: self.id,
            parent: self.parent,
            on_entry: self.on_entry,
            on_exit: self.on_exit,
            handlers: self.handlers,
        }
    }
}

/// The immutable, fully-assembled state set of one actor type.
#[derive(Clone)]
pub struct StateMachineDef {
    pub(crate) states: HashMap<StateId, StateDef>,
    pub(crate) start: StateId,
    pub(crate) on_exception: Option<Arc<dyn Fn(&CoyoteError) -> OnExceptionAction + Send + Sync>>,
    pub(crate) on_event_unhandled: Option<Arc<dyn Fn(&Event) -> OnExceptionAction + Send + Sync>>,
    pub(crate) on_halt: Option<Arc<HookFn>>,
}

impl StateMachineDef {
    pub fn start(&self) -> &StateId {
        &self.start
    }

    pub fn state(&self, id: &StateId) -> Option<&StateDef> {
        self.states.get(id)
    }

    pub fn contains(&self, id: &StateId) -> bool {
        self.states.contains_key(id)
    }

    /// Walk the handler tables from `from` up through its parent chain,
    /// returning the first declared action for `tag`, per spec §4.2 rule
    /// 3 ("current state or any ancestor").
    pub fn resolve(&self, from: &StateId, tag: &str) -> Option<&EventAction> {
        let mut cursor = Some(from.clone());
        while let Some(id) = cursor {
            let state = self.states.get(&id)?;
            if let Some(action) = state.action_for(tag) {
                return Some(action);
            }
            cursor = state.parent.clone();
        }
        None
    }
}

/// Assembles a [`StateMachineDef`]. Construction-time errors (undeclared
/// start state, a `goto`/`push` target that names no declared state) are
/// caught here rather than at dispatch time.
pub struct StateMachineBuilder {
    start: StateId,
    states: HashMap<StateId, StateDef>,
    on_exception: Option<Arc<dyn Fn(&CoyoteError) -> OnExceptionAction + Send + Sync>>,
    on_event_unhandled: Option<Arc<dyn Fn(&Event) -> OnExceptionAction + Send + Sync>>,
    on_halt: Option<Arc<HookFn>>,
}

impl StateMachineBuilder {
    pub fn new(start: impl Into<StateId>) -> Self {
        Self {
            start: start.into(),
            states: HashMap::new(),
            on_exception: None,
            on_event_unhandled: None,
            on_halt: None,
        }
    }

    pub fn state<F>(mut self, id: impl Into<StateId>, build: F) -> Self
    where
        F: FnOnce(StateBuilder) -> StateBuilder,
    {
        let id = id.into();
        let built = build(StateBuilder::new(id.clone())).build();
        self.states.insert(id, built);
        self
    }

    /// Register the actor-wide `OnException` hook (spec §4.9): consulted
    /// whenever a handler or lifecycle hook body returns `Err`, in place
    /// of propagating the error and failing the iteration.
    pub fn on_exception<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CoyoteError) -> OnExceptionAction + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(hook));
        self
    }

    /// Register the actor-wide fallback for an event with no declared
    /// action in the current state or any ancestor.
    pub fn on_event_unhandled<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Event) -> OnExceptionAction + Send + Sync + 'static,
    {
        self.on_event_unhandled = Some(Arc::new(hook));
        self
    }

    /// Register the hook run once, after the inbox is drained, while the
    /// actor transitions `Halting -> Halted`.
    pub fn on_halt<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ActorContext) -> Result<()> + Send + Sync + 'static,
    {
        self.on_halt = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<StateMachineDef> {
        if !self.states.contains_key(&self.start) {
            return Err(CoyoteError::UsageError {
                message: format!("start state '{}' was never declared", self.start),
                fault: Fault::default(),
            });
        }
        for state in self.states.values() {
            if let Some(parent) = &state.parent {
                if !self.states.contains_key(parent) {
                    return Err(CoyoteError::UsageError {
                        message: format!(
                            "state '{}' declares unknown parent '{}'",
                            state.id, parent
                        ),
                        fault: Fault::default(),
                    });
                }
            }
            for action in state.handlers.values() {
                let target = match action {
                    EventAction::Goto(t) | EventAction::Push(t) => Some(t),
                    _ => None,
                };
                if let Some(t) = target {
                    if !self.states.contains_key(t) {
                        return Err(CoyoteError::UsageError {
                            message: format!(
                                "state '{}' transitions to undeclared state '{}'",
                                state.id, t
                            ),
                            fault: Fault::default(),
                        });
                    }
                }
            }
        }
        Ok(StateMachineDef {
            states: self.states,
            start: self.start,
            on_exception: self.on_exception,
            on_event_unhandled: self.on_event_unhandled,
            on_halt: self.on_halt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_goto_to_undeclared_state() {
        let result = StateMachineBuilder::new("S1")
            .state("S1", |s| s.goto("go", "S2"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn resolves_through_parent_chain() {
        let def = StateMachineBuilder::new("Child")
            .state("Parent", |s| s.on_event("ping", |_, _| Ok(())))
            .state("Child", |s| s.parent("Parent"))
            .build()
            .unwrap();
        assert!(def.resolve(&StateId::new("Child"), "ping").is_some());
    }
}
