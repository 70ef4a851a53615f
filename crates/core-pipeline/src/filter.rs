//! Facet filters: declarative selection of change-log entries.
//!
//! A filter matches a facet when **all** of its clauses match: the facet's
//! type is in the type set, every named aspect equals its expected value,
//! and every named attribute equals its expected value. A filter with no
//! clauses matches everything, as does an empty filter list.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_veil::{Facet, FacetChange};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetFilter {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub facet_types: BTreeSet<String>,
    /// Aspect name (camelCase as serialized: `streamId`, `agentId`, …) to
    /// required value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl FacetFilter {
    pub fn of_type(mut self, facet_type: impl Into<String>) -> Self {
        self.facet_types.insert(facet_type.into());
        self
    }

    pub fn with_aspect(mut self, aspect: impl Into<String>, value: impl Into<String>) -> Self {
        self.aspects.insert(aspect.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn is_match_all(&self) -> bool {
        self.facet_types.is_empty() && self.aspects.is_empty() && self.attributes.is_empty()
    }

    pub fn matches(&self, facet: &Facet) -> bool {
        if !self.facet_types.is_empty() && !self.facet_types.contains(&facet.facet_type) {
            return false;
        }
        for (aspect, expected) in &self.aspects {
            if aspect_value(facet, aspect).as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        for (key, expected) in &self.attributes {
            if facet.attribute(key) != Some(expected) {
                return false;
            }
        }
        true
    }
}

fn aspect_value(facet: &Facet, aspect: &str) -> Option<String> {
    let a = &facet.aspects;
    match aspect {
        "streamId" => a.stream_id.clone(),
        "streamType" => a.stream_type.clone(),
        "agentId" => a.agent_id.clone(),
        "agentName" => a.agent_name.clone(),
        "entityType" => a.entity_type.clone(),
        "entityId" => a.entity_id.clone(),
        _ => None,
    }
}

/// True when any filter in `filters` matches; an empty list matches all.
pub fn any_filter_matches(filters: &[FacetFilter], facet: &Facet) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(facet))
}

/// The subset of `changes` visible through `filters`, in original order.
/// Matching is evaluated against the latest snapshot of each change.
pub fn filter_changes(filters: &[FacetFilter], changes: &[FacetChange]) -> Vec<FacetChange> {
    changes
        .iter()
        .filter(|c| any_filter_matches(filters, c.latest()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn speech_facet() -> Facet {
        Facet::new("s-1", "speech")
            .with_stream("chan-1")
            .with_agent("agent-7")
            .with_attribute("sourceAgentId", json!("user"))
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = FacetFilter::default();
        assert!(f.is_match_all());
        assert!(f.matches(&speech_facet()));
    }

    #[test]
    fn all_clauses_must_hold() {
        let facet = speech_facet();
        let f = FacetFilter::default()
            .of_type("speech")
            .with_aspect("streamId", "chan-1")
            .with_attribute("sourceAgentId", json!("user"));
        assert!(f.matches(&facet));

        let wrong_type = FacetFilter::default()
            .of_type("thought")
            .with_aspect("streamId", "chan-1");
        assert!(!wrong_type.matches(&facet));

        let wrong_aspect = FacetFilter::default()
            .of_type("speech")
            .with_aspect("agentId", "someone-else");
        assert!(!wrong_aspect.matches(&facet));

        let wrong_attr = FacetFilter::default()
            .of_type("speech")
            .with_attribute("sourceAgentId", json!("assistant"));
        assert!(!wrong_attr.matches(&facet));
    }

    #[test]
    fn type_set_is_a_union() {
        let f = FacetFilter::default().of_type("speech").of_type("thought");
        assert!(f.matches(&Facet::new("a", "speech")));
        assert!(f.matches(&Facet::new("b", "thought")));
        assert!(!f.matches(&Facet::new("c", "state")));
    }

    #[test]
    fn unknown_aspect_name_never_matches() {
        let f = FacetFilter::default().with_aspect("nonsense", "x");
        assert!(!f.matches(&speech_facet()));
    }

    #[test]
    fn filter_changes_keeps_order_and_uses_latest_snapshot() {
        let before = Facet::new("f", "state");
        let after = Facet::new("f", "state").with_attribute("ready", json!(true));
        let changes = vec![
            FacetChange::Added {
                facet: Facet::new("a", "speech"),
            },
            FacetChange::Modified {
                before,
                after: after.clone(),
            },
            FacetChange::Removed {
                facet: Facet::new("z", "thought"),
            },
        ];
        let filters = vec![
            FacetFilter::default().with_attribute("ready", json!(true)),
            FacetFilter::default().of_type("speech"),
        ];
        let filtered = filter_changes(&filters, &changes);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id(), "a");
        assert_eq!(filtered[1].id(), "f");

        let all = filter_changes(&[], &changes);
        assert_eq!(all.len(), 3, "empty filter list matches all");
    }
}
