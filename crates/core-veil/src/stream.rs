//! Streams and agents known to the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named conversational/context channel. Facets and frames may be scoped
/// to a stream; the kernel stores them, applications interpret them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Stream {
    pub fn new(id: impl Into<String>, stream_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_type: stream_type.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

bitflags::bitflags! {
    /// Capability flags of an agent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AgentFlags: u8 {
        const SPEECH   = 0b0000_0001;
        const ACTIONS  = 0b0000_0010;
        const THOUGHTS = 0b0000_0100;
    }
}

// Flags persist as their raw bits: compact, deterministic, and tolerant of
// retired capability bits on read.
mod agent_flags_serde {
    use super::AgentFlags;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for AgentFlags {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u8(self.bits())
        }
    }

    impl<'de> Deserialize<'de> for AgentFlags {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let bits = u8::deserialize(deserializer)?;
            Ok(AgentFlags::from_bits_truncate(bits))
        }
    }
}

/// A named processor of rendered context. One frame has at most one current
/// agent; outgoing frames record which agent produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default = "AgentFlags::empty")]
    pub flags: AgentFlags,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            flags: AgentFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: AgentFlags) -> Self {
        self.flags = flags;
        self
    }
}
