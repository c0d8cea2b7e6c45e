//! Tagged-variant event payloads and the envelopes that carry them.
//!
//! The original system dispatches on dynamically typed payloads; per the
//! redesign notes (spec.md §9) this runtime keys dispatch on an explicit
//! tag and exposes typed accessors instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ActorId, GroupId};

/// A tagged event payload. The tag is what handler tables key on; `data`
/// is an opaque, typed-at-the-edges payload (JSON, matching the rest of
/// the serialization story used for trace files and configuration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    tag: String,
    data: Value,
}

impl Event {
    /// Construct an event with no payload beyond its tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            data: Value::Null,
        }
    }

    /// Construct an event carrying a JSON-serializable payload.
    pub fn with_payload(tag: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            tag: tag.into(),
            data: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// The dispatch key.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Typed access to the payload. Returns `None` if absent or if it
    /// does not deserialize to `T`.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Reserved tag for the halt signal raised to drain and terminate an
    /// actor.
    pub const HALT: &'static str = "__halt__";

    /// Build the reserved halt event.
    pub fn halt() -> Self {
        Self::new(Self::HALT)
    }

    /// True if this is the reserved halt event.
    pub fn is_halt(&self) -> bool {
        self.tag == Self::HALT
    }
}

/// A queued event together with routing metadata.
///
/// Per the data model: "Must-handle events may not be silently dropped."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: Event,
    pub sender: Option<ActorId>,
    pub target: ActorId,
    pub group: Option<GroupId>,
    pub must_handle: bool,
}

impl Envelope {
    pub fn new(event: Event, target: ActorId) -> Self {
        Self {
            event,
            sender: None,
            target,
            group: None,
            must_handle: false,
        }
    }

    pub fn with_sender(mut self, sender: ActorId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn must_handle(mut self, must_handle: bool) -> Self {
        self.must_handle = must_handle;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips() {
        let ev = Event::with_payload("write", serde_json::json!({"idx": 1, "val": 7}));
        let payload: serde_json::Value = ev.payload().unwrap();
        assert_eq!(payload["idx"], 1);
    }

    #[test]
    fn halt_is_recognized() {
        assert!(Event::halt().is_halt());
        assert!(!Event::new("tick").is_halt());
    }
}
