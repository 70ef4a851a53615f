//! Serialized form of the element tree, embedded in persistence snapshots.
//!
//! Nodes are listed parents-before-children so restoration can rebuild the
//! hierarchy in one pass. Components carry their registry type name, the
//! registry version current at snapshot time, their creation config, and
//! their declared persistent state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSnapshot {
    pub type_name: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementTreeSnapshot {
    pub nodes: Vec<ElementSnapshot>,
}

impl ElementTreeSnapshot {
    /// The root node: the single node with no parent.
    pub fn root(&self) -> Option<&ElementSnapshot> {
        self.nodes.iter().find(|n| n.parent.is_none())
    }
}
