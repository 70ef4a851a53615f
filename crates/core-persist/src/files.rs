//! Persisted file shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_tree::ElementTreeSnapshot;
use core_veil::{Frame, VeilStateSnapshot, iso_timestamp};

/// Current snapshot serializer version. Snapshots written by a newer
/// serializer are rejected at load (schema evolution across incompatible
/// versions is out of scope).
pub const SNAPSHOT_VERSION: u32 = 1;

/// A full restore point: the serialized store plus the serialized element
/// tree, tagged with its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    pub version: u32,
    pub timestamp: String,
    pub sequence: u64,
    pub lifecycle_id: u64,
    pub space_id: String,
    pub veil_state: VeilStateSnapshot,
    pub element_tree: ElementTreeSnapshot,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl SnapshotFile {
    pub fn new(
        sequence: u64,
        lifecycle_id: u64,
        space_id: impl Into<String>,
        veil_state: VeilStateSnapshot,
        element_tree: ElementTreeSnapshot,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: iso_timestamp(),
            sequence,
            lifecycle_id,
            space_id: space_id.into(),
            veil_state,
            element_tree,
            metadata: Value::Null,
        }
    }
}

/// One frame's durable record, written every frame by the persistence
/// maintainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaFile {
    pub sequence: u64,
    pub timestamp: String,
    pub lifecycle_id: u64,
    pub frame: Frame,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_operations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_context: Option<Value>,
}

impl DeltaFile {
    pub fn new(lifecycle_id: u64, frame: Frame) -> Self {
        Self {
            sequence: frame.sequence,
            timestamp: frame.timestamp.clone(),
            lifecycle_id,
            frame,
            element_operations: None,
            rendered_context: None,
        }
    }
}

/// Audit record left behind by the delete-recent-frames recovery operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionRecord {
    pub from_sequence: u64,
    pub removed_frames: usize,
    pub removed_delta_files: Vec<u64>,
    pub timestamp: String,
    pub lifecycle_id: u64,
}
