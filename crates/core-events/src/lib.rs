//! Event envelope, priority queue, and topic grammar for the synapse kernel.
//!
//! Everything that flows *into* a frame is an [`Event`]: a topic string, a
//! source element reference, an arbitrary JSON payload, and dispatch metadata.
//! Events are produced by async sources (console readline, chat gateways,
//! timers) between frames and by effectors/maintainers at the end of a frame;
//! they are consumed in priority order by the frame engine at the start of the
//! next frame.
//!
//! Channel policy: external producers feed a bounded mpsc channel
//! (`EVENT_CHANNEL_CAP`) which the run loop drains into the unbounded
//! in-kernel [`PriorityEventQueue`] between frames. Backpressure therefore
//! lands on the afferent sources (a blocked `send`), never on the frame loop.

use serde::{Deserialize, Serialize};

pub mod pattern;
pub mod queue;
pub mod source;

pub use pattern::topic_matches;
pub use queue::{PriorityEventQueue, QueueDebugInfo};
pub use source::{AsyncEventSource, EventSourceRegistry};

/// Bounded capacity of the channel between async event sources and the run
/// loop. Producers block (`send().await`) when the kernel falls behind.
pub const EVENT_CHANNEL_CAP: usize = 1024;

/// Topics reserved by the kernel. Applications may use any other topic.
pub mod topics {
    pub const FRAME_START: &str = "frame:start";
    pub const FRAME_END: &str = "frame:end";
    pub const ELEMENT_MOUNT: &str = "element:mount";
    pub const ELEMENT_UNMOUNT: &str = "element:unmount";
    pub const ELEMENT_CREATE: &str = "element:create";
    pub const ELEMENT_DESTROY: &str = "element:destroy";
    pub const ELEMENT_ACTION: &str = "element:action";
    pub const COMPONENT_ADD: &str = "component:add";
    pub const AGENT_ACTIVATE: &str = "agent:activate";
    pub const AGENT_FRAME_READY: &str = "agent:frame-ready";
    pub const SYSTEM_ERROR: &str = "system:error";
    /// Compat topic: payload carries a raw VEIL delta to apply next frame.
    pub const VEIL_OPERATION: &str = "veil:operation";
}

/// Scheduling class of an event. FIFO within a class; `High` always drains
/// before `Normal` before `Low`. Starvation of lower classes is permitted by
/// design (agents preempt with `High`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Reference to an element in the live tree, carried by events for source and
/// target identity. `element_path` is the name path from the root, captured at
/// emission time for log readability; `element_id` is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub element_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
}

impl ElementRef {
    pub fn new(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            element_path: Vec::new(),
            element_type: None,
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.element_path = path;
        self
    }

    pub fn with_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }
}

/// Dispatch phase of a propagated event (DOM-style). `0` = not dispatched.
pub const PHASE_NONE: u8 = 0;
pub const PHASE_CAPTURE: u8 = 1;
pub const PHASE_AT_TARGET: u8 = 2;
pub const PHASE_BUBBLE: u8 = 3;

/// The event envelope. Serialized as part of persisted frames, so field names
/// follow the on-disk camelCase convention and dispatch bookkeeping fields
/// default to their inert values when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub topic: String,
    pub source: ElementRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementRef>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch, captured at construction.
    pub timestamp: i64,
    #[serde(default)]
    pub priority: EventPriority,
    /// Broadcast (default) visits every active subscribed element; otherwise
    /// the event walks capture/target/bubble phases toward `target`.
    #[serde(default = "default_true")]
    pub broadcast: bool,
    #[serde(default = "default_true")]
    pub bubbles: bool,
    #[serde(default)]
    pub cancelable: bool,
    #[serde(default)]
    pub event_phase: u8,
    #[serde(default)]
    pub propagation_stopped: bool,
    #[serde(default)]
    pub immediate_propagation_stopped: bool,
    #[serde(default)]
    pub default_prevented: bool,
}

fn default_true() -> bool {
    true
}

impl Event {
    pub fn new(topic: impl Into<String>, source: ElementRef, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            source,
            target: None,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            priority: EventPriority::Normal,
            broadcast: true,
            bubbles: true,
            cancelable: false,
            event_phase: PHASE_NONE,
            propagation_stopped: false,
            immediate_propagation_stopped: false,
            default_prevented: false,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: ElementRef) -> Self {
        self.target = Some(target);
        self.broadcast = false;
        self
    }

    pub fn non_bubbling(mut self) -> Self {
        self.bubbles = false;
        self
    }

    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    /// Halt further propagation after the current element finishes.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Halt propagation immediately, skipping remaining handlers on the
    /// current element as well.
    pub fn stop_immediate_propagation(&mut self) {
        self.propagation_stopped = true;
        self.immediate_propagation_stopped = true;
    }

    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    /// Convenience accessor for string fields inside the payload object.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Build a `system:error` event from a failed processor. The payload shape is
/// stable so downstream receptors can materialize diagnostic facets from it.
pub fn system_error_event(
    source: ElementRef,
    kind: &str,
    detail: impl std::fmt::Display,
) -> Event {
    Event::new(
        topics::SYSTEM_ERROR,
        source,
        serde_json::json!({ "kind": kind, "detail": detail.to_string() }),
    )
    .with_priority(EventPriority::High)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let ev = Event::new(
            "console:input",
            ElementRef::new("console").with_type("console"),
            serde_json::json!({ "input": "hello" }),
        )
        .with_priority(EventPriority::High);
        let json = serde_json::to_string(&ev).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ev);
    }

    #[test]
    fn dispatch_bookkeeping_defaults_absent_from_json() {
        let ev = Event::new("a:b", ElementRef::new("root"), serde_json::Value::Null);
        let json = serde_json::to_value(&ev).expect("serialize");
        let obj = json.as_object().expect("object");
        assert!(!obj.contains_key("target"));
        assert_eq!(obj["priority"], "normal");
        assert_eq!(obj["eventPhase"], 0);
    }

    #[test]
    fn prevent_default_requires_cancelable() {
        let mut ev = Event::new("a:b", ElementRef::new("root"), serde_json::Value::Null);
        ev.prevent_default();
        assert!(!ev.default_prevented);
        let mut ev = ev.cancelable();
        ev.prevent_default();
        assert!(ev.default_prevented);
    }

    #[test]
    fn system_error_events_are_high_priority() {
        let ev = system_error_event(ElementRef::new("root"), "effector-error", "boom");
        assert_eq!(ev.priority, EventPriority::High);
        assert_eq!(ev.payload_str("kind"), Some("effector-error"));
        assert_eq!(ev.payload_str("detail"), Some("boom"));
    }
}
