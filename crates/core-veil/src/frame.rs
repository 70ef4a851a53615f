//! Frames: the canonical unit of change.

use core_events::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::delta::VeilDelta;

/// Reference to the stream scoping a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRef {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

impl StreamRef {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            stream_type: None,
        }
    }
}

/// One atomic advancement of the world: the events consumed, the complete
/// ordered list of deltas applied, and an optional structured record of
/// element-tree transitions for the same sequence. Immutable once committed
/// to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub sequence: u64,
    /// ISO-8601, millisecond precision, UTC.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deltas: Vec<VeilDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_stream: Option<StreamRef>,
}

impl Frame {
    /// A new frame for `sequence` stamped with the current time and the
    /// deterministic uuid for that sequence.
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            timestamp: iso_timestamp(),
            uuid: Some(frame_uuid(sequence)),
            events: Vec::new(),
            deltas: Vec::new(),
            transition: None,
            active_stream: None,
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn with_deltas(mut self, deltas: Vec<VeilDelta>) -> Self {
        self.deltas = deltas;
        self
    }

    pub fn with_active_stream(mut self, stream: StreamRef) -> Self {
        self.active_stream = Some(stream);
        self
    }
}

/// Deterministic external identity of a frame: hex SHA-1 of the decimal
/// sequence. Stable across restarts and replays by construction.
pub fn frame_uuid(sequence: u64) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sequence.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Current time as an ISO-8601 UTC string with millisecond precision.
pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
