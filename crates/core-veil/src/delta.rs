//! VEIL mutation operations and the change log they produce.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::facet::{Facet, FacetAspects};

/// One mutation of the store. The serialized tag names (`addFacet`,
/// `changeState`, `rewriteFacet`, `removeFacet`) are part of the persisted
/// frame schema and must stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VeilDelta {
    #[serde(rename_all = "camelCase")]
    AddFacet { facet: Facet },
    /// Shallow object merge into the facet's `state` payload.
    #[serde(rename_all = "camelCase")]
    ChangeState { id: String, state: Value },
    /// Partial overwrite: provided fields replace the facet's current values.
    #[serde(rename_all = "camelCase")]
    RewriteFacet {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aspects: Option<FacetAspects>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ephemeral: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveFacet { id: String },
}

impl VeilDelta {
    pub fn add(facet: Facet) -> Self {
        VeilDelta::AddFacet { facet }
    }

    pub fn change_state(id: impl Into<String>, state: Value) -> Self {
        VeilDelta::ChangeState {
            id: id.into(),
            state,
        }
    }

    pub fn rewrite(id: impl Into<String>) -> RewriteBuilder {
        RewriteBuilder {
            id: id.into(),
            content: None,
            state: None,
            aspects: None,
            ephemeral: None,
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        VeilDelta::RemoveFacet { id: id.into() }
    }

    /// The facet id this delta targets.
    pub fn facet_id(&self) -> &str {
        match self {
            VeilDelta::AddFacet { facet } => &facet.id,
            VeilDelta::ChangeState { id, .. } => id,
            VeilDelta::RewriteFacet { id, .. } => id,
            VeilDelta::RemoveFacet { id } => id,
        }
    }
}

/// Builder for partial `rewriteFacet` deltas.
#[derive(Debug, Clone)]
pub struct RewriteBuilder {
    id: String,
    content: Option<String>,
    state: Option<Value>,
    aspects: Option<FacetAspects>,
    ephemeral: Option<bool>,
}

impl RewriteBuilder {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn aspects(mut self, aspects: FacetAspects) -> Self {
        self.aspects = Some(aspects);
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }

    pub fn build(self) -> VeilDelta {
        VeilDelta::RewriteFacet {
            id: self.id,
            content: self.content,
            state: self.state,
            aspects: self.aspects,
            ephemeral: self.ephemeral,
        }
    }
}

/// One entry of the change log returned by a delta application: the net
/// effect on a single facet, with before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FacetChange {
    #[serde(rename_all = "camelCase")]
    Added { facet: Facet },
    #[serde(rename_all = "camelCase")]
    Modified { before: Facet, after: Facet },
    #[serde(rename_all = "camelCase")]
    Removed { facet: Facet },
}

impl FacetChange {
    pub fn id(&self) -> &str {
        match self {
            FacetChange::Added { facet } => &facet.id,
            FacetChange::Modified { after, .. } => &after.id,
            FacetChange::Removed { facet } => &facet.id,
        }
    }

    /// The facet as of this change: the new snapshot for adds and
    /// modifications, the final snapshot for removals.
    pub fn latest(&self) -> &Facet {
        match self {
            FacetChange::Added { facet } => facet,
            FacetChange::Modified { after, .. } => after,
            FacetChange::Removed { facet } => facet,
        }
    }

    pub fn facet_type(&self) -> &str {
        &self.latest().facet_type
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, FacetChange::Removed { .. })
    }
}
