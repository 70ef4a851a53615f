//! Facets: the atomic unit of world content.
//!
//! A facet is an open tagged record: a globally unique `id`, a free-form
//! `type` tag, optional human text (`content`), an optional structured
//! payload (`state`), and a set of optional aspect fields scoping it to
//! streams, agents, and entities. The kernel discriminates facets only by
//! the string tag; applications own the vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conventional facet type tags. The kernel itself special-cases only
/// `element-tree` and `element-request`; the rest are application vocabulary
/// shared here so spellings stay consistent.
pub mod facet_types {
    pub const EVENT: &str = "event";
    pub const STATE: &str = "state";
    pub const AMBIENT: &str = "ambient";
    pub const SPEECH: &str = "speech";
    pub const ACTION: &str = "action";
    pub const ACTION_DEFINITION: &str = "action-definition";
    pub const AGENT_ACTIVATION: &str = "agent-activation";
    pub const ELEMENT_TREE: &str = "element-tree";
    pub const ELEMENT_REQUEST: &str = "element-request";
    pub const RENDERED_CONTEXT: &str = "rendered-context";
    pub const STREAM_CHANGE: &str = "stream-change";
    pub const THOUGHT: &str = "thought";
}

/// Optional scoping fields shared by all facet kinds. Every field skips
/// serialization when empty so persisted facets stay minimal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetAspects {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saliency: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

impl FacetAspects {
    pub fn is_empty(&self) -> bool {
        self.stream_id.is_none()
            && self.stream_type.is_none()
            && self.agent_id.is_none()
            && self.agent_name.is_none()
            && self.entity_type.is_none()
            && self.entity_id.is_none()
            && self.scopes.is_empty()
            && self.saliency.is_none()
            && self.attributes.is_empty()
            && self.children.is_empty()
    }

    /// Overlay `patch` onto self: provided scalar fields replace, provided
    /// collections replace wholesale. Used by `rewriteFacet`.
    pub fn overlay(&mut self, patch: &FacetAspects) {
        macro_rules! take_some {
            ($field:ident) => {
                if patch.$field.is_some() {
                    self.$field = patch.$field.clone();
                }
            };
        }
        take_some!(stream_id);
        take_some!(stream_type);
        take_some!(agent_id);
        take_some!(agent_name);
        take_some!(entity_type);
        take_some!(entity_id);
        take_some!(saliency);
        if !patch.scopes.is_empty() {
            self.scopes = patch.scopes.clone();
        }
        if !patch.attributes.is_empty() {
            for (k, v) in &patch.attributes {
                self.attributes.insert(k.clone(), v.clone());
            }
        }
        if !patch.children.is_empty() {
            self.children = patch.children.clone();
        }
    }
}

/// The atomic unit of world content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facet {
    pub id: String,
    #[serde(rename = "type")]
    pub facet_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(flatten)]
    pub aspects: FacetAspects,
    /// Ephemeral facets are removed by the built-in cleanup transform one
    /// frame after they first became visible to effectors.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
}

impl Facet {
    pub fn new(id: impl Into<String>, facet_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            facet_type: facet_type.into(),
            content: None,
            state: None,
            aspects: FacetAspects::default(),
            ephemeral: false,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.aspects.attributes.insert(key.into(), value);
        self
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.aspects.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.aspects.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.aspects.entity_type = Some(entity_type.into());
        self.aspects.entity_id = Some(entity_id.into());
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.aspects.attributes.get(key)
    }

    /// Lookup into the structured `state` payload, when it is an object.
    pub fn state_field(&self, key: &str) -> Option<&Value> {
        self.state.as_ref().and_then(|s| s.get(key))
    }
}
