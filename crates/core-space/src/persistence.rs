//! The phase-4 persistence maintainer.
//!
//! Owned by the Space rather than mounted as a tree component so that
//! restoration and the final shutdown snapshot can reach it directly. It
//! runs last in phase 4: one delta file per frame, a full snapshot every
//! `snapshot_interval` frames. Write failures are logged and retried at the
//! next cadence point; the kernel does not pause.

use std::path::PathBuf;
use std::rc::Rc;

use serde_json::Value;

use core_persist::{DeltaFile, FileStorage, PersistError, SnapshotFile};
use core_tree::{ComponentRegistry, Tree};
use core_veil::{Frame, VeilState};

pub struct PersistenceMaintainer {
    storage: Rc<FileStorage>,
    lifecycle_id: u64,
    snapshot_interval: u64,
    frames_since_snapshot: u64,
}

impl PersistenceMaintainer {
    pub fn new(storage: Rc<FileStorage>, lifecycle_id: u64, snapshot_interval: u64) -> Self {
        Self {
            storage,
            lifecycle_id,
            snapshot_interval: snapshot_interval.max(1),
            frames_since_snapshot: 0,
        }
    }

    pub fn storage(&self) -> &Rc<FileStorage> {
        &self.storage
    }

    pub fn lifecycle_id(&self) -> u64 {
        self.lifecycle_id
    }

    /// Seed the snapshot cadence after restoration, so the interval counts
    /// from the restored snapshot rather than from process start.
    pub fn set_frames_since_snapshot(&mut self, frames: u64) {
        self.frames_since_snapshot = frames;
    }

    /// Record one frame: write its delta file, and write a snapshot when the
    /// cadence comes due.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_frame(
        &mut self,
        frame: &Frame,
        element_operations: Option<Value>,
        rendered_context: Option<Value>,
        veil: &VeilState,
        tree: &Tree,
        component_types: &ComponentRegistry,
        space_id: &str,
    ) -> Result<(), PersistError> {
        let mut delta = DeltaFile::new(self.lifecycle_id, frame.clone());
        delta.element_operations = element_operations;
        delta.rendered_context = rendered_context;
        self.storage.write_delta(&delta).await?;
        self.frames_since_snapshot += 1;
        if self.frames_since_snapshot >= self.snapshot_interval {
            self.snapshot_now(veil, tree, component_types, space_id)
                .await?;
        }
        Ok(())
    }

    /// Write a snapshot immediately and reset the cadence. Used by the
    /// interval, graceful shutdown, and the recovery operation.
    pub async fn snapshot_now(
        &mut self,
        veil: &VeilState,
        tree: &Tree,
        component_types: &ComponentRegistry,
        space_id: &str,
    ) -> Result<PathBuf, PersistError> {
        let snapshot = SnapshotFile::new(
            veil.current_sequence(),
            self.lifecycle_id,
            space_id,
            veil.to_snapshot(),
            tree.to_snapshot(component_types),
        );
        let path = self.storage.write_snapshot(&snapshot).await?;
        self.frames_since_snapshot = 0;
        Ok(path)
    }
}

impl std::fmt::Debug for PersistenceMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMaintainer")
            .field("lifecycle_id", &self.lifecycle_id)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("frames_since_snapshot", &self.frames_since_snapshot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_tree::Element;

    #[tokio::test]
    async fn snapshot_cadence_counts_frames() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Rc::new(FileStorage::new(dir.path()));
        storage.init().await.unwrap();
        let mut veil = VeilState::new();
        let tree = Tree::new(Element::new("space", "space"));
        let types = ComponentRegistry::new();
        let mut maintainer = PersistenceMaintainer::new(storage.clone(), 0, 3);

        for _ in 0..3 {
            let seq = veil.next_sequence();
            let frame = Frame::new(seq);
            veil.commit_frame(frame.clone(), &[]).unwrap();
            maintainer
                .record_frame(&frame, None, None, &veil, &tree, &types, "space")
                .await
                .unwrap();
        }
        let snap = storage.latest_snapshot().await.unwrap().expect("interval hit");
        assert_eq!(snap.sequence, 3);
        assert_eq!(storage.deltas_after(0, 0).await.unwrap().len(), 3);

        // Cadence restarts after the snapshot.
        let seq = veil.next_sequence();
        let frame = Frame::new(seq);
        veil.commit_frame(frame.clone(), &[]).unwrap();
        maintainer
            .record_frame(&frame, None, None, &veil, &tree, &types, "space")
            .await
            .unwrap();
        let snap = storage.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(snap.sequence, 3, "no new snapshot after one more frame");
    }
}
