//! File-backed storage adapter.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tokio::sync::Mutex;

use crate::error::PersistError;
use crate::files::{DeletionRecord, DeltaFile, SNAPSHOT_VERSION, SnapshotFile};

const SNAPSHOTS_DIR: &str = "snapshots";
const DELTAS_DIR: &str = "deltas";
const DELETIONS_DIR: &str = "deletions";
const LIFECYCLE_FILE: &str = "lifecycle";

pub struct FileStorage {
    root: PathBuf,
    /// Per-path write locks; concurrent writers to the same file serialize,
    /// writers to different files do not.
    locks: RefCell<HashMap<PathBuf, Rc<Mutex<()>>>>,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: RefCell::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory layout. Idempotent.
    pub async fn init(&self) -> Result<(), PersistError> {
        for dir in [SNAPSHOTS_DIR, DELTAS_DIR, DELETIONS_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Resolve the lifecycle id for this run. Without `reset`, the stored id
    /// (or a fresh 0) is returned. With `reset`, the storage directory is
    /// wiped and the id advances, so replay never mixes runs.
    pub async fn prepare_lifecycle(&self, reset: bool) -> Result<u64, PersistError> {
        let marker = self.root.join(LIFECYCLE_FILE);
        let stored: Option<u64> = match tokio::fs::read_to_string(&marker).await {
            Ok(text) => text.trim().parse().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let lifecycle_id = if reset {
            let next = stored.map(|id| id + 1).unwrap_or(0);
            if tokio::fs::metadata(&self.root).await.is_ok() {
                tokio::fs::remove_dir_all(&self.root).await?;
            }
            tokio::fs::create_dir_all(&self.root).await?;
            tracing::info!(target: "persist.io", lifecycle_id = next, "storage_reset");
            next
        } else {
            stored.unwrap_or(0)
        };
        self.init().await?;
        self.write_atomic(&marker, lifecycle_id.to_string().into_bytes())
            .await?;
        Ok(lifecycle_id)
    }

    // ---- snapshots ------------------------------------------------------

    pub async fn write_snapshot(&self, snapshot: &SnapshotFile) -> Result<PathBuf, PersistError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = self
            .root
            .join(SNAPSHOTS_DIR)
            .join(format!("snapshot-{}-{}.json", snapshot.sequence, stamp));
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            PersistError::Malformed {
                path: path.clone(),
                source,
            }
        })?;
        self.write_atomic(&path, bytes).await?;
        tracing::info!(
            target: "persist.io",
            sequence = snapshot.sequence,
            lifecycle_id = snapshot.lifecycle_id,
            path = %path.display(),
            "snapshot_written"
        );
        Ok(path)
    }

    /// The newest snapshot: highest sequence, ties broken by the timestamp
    /// embedded in the filename. `Ok(None)` when no snapshot exists; a
    /// snapshot that exists but cannot be parsed is an error (callers treat
    /// load failure as fatal rather than silently starting fresh).
    pub async fn latest_snapshot(&self) -> Result<Option<SnapshotFile>, PersistError> {
        let dir = self.root.join(SNAPSHOTS_DIR);
        let mut best: Option<(u64, String, PathBuf)> = None;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((sequence, stamp)) = parse_snapshot_name(&name) else {
                continue;
            };
            let candidate = (sequence, stamp, entry.path());
            best = match best.take() {
                None => Some(candidate),
                Some(current) => {
                    if (candidate.0, &candidate.1) > (current.0, &current.1) {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        let Some((_, _, path)) = best else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await?;
        let snapshot: SnapshotFile =
            serde_json::from_slice(&bytes).map_err(|source| PersistError::Malformed {
                path: path.clone(),
                source,
            })?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                path,
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot))
    }

    // ---- deltas ---------------------------------------------------------

    pub async fn write_delta(&self, delta: &DeltaFile) -> Result<PathBuf, PersistError> {
        let path = self
            .root
            .join(DELTAS_DIR)
            .join(format!("delta-{}.json", delta.sequence));
        let bytes =
            serde_json::to_vec(delta).map_err(|source| PersistError::Malformed {
                path: path.clone(),
                source,
            })?;
        self.write_atomic(&path, bytes).await?;
        tracing::debug!(
            target: "persist.io",
            sequence = delta.sequence,
            "delta_written"
        );
        Ok(path)
    }

    /// Deltas with `sequence > after` belonging to `lifecycle_id`, sorted by
    /// sequence. Deltas from other lifecycles are skipped, not errors.
    pub async fn deltas_after(
        &self,
        after: u64,
        lifecycle_id: u64,
    ) -> Result<Vec<DeltaFile>, PersistError> {
        let dir = self.root.join(DELTAS_DIR);
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(sequence) = parse_delta_name(&name)
                && sequence > after
            {
                found.push((sequence, entry.path()));
            }
        }
        found.sort_by_key(|(sequence, _)| *sequence);
        let mut deltas = Vec::with_capacity(found.len());
        for (_, path) in found {
            let bytes = tokio::fs::read(&path).await?;
            let delta: DeltaFile =
                serde_json::from_slice(&bytes).map_err(|source| PersistError::Malformed {
                    path: path.clone(),
                    source,
                })?;
            if delta.lifecycle_id == lifecycle_id {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// Remove every delta file with `sequence >= from`. Returns the removed
    /// sequences, sorted. Idempotent.
    pub async fn remove_deltas_from(&self, from: u64) -> Result<Vec<u64>, PersistError> {
        let dir = self.root.join(DELTAS_DIR);
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(sequence) = parse_delta_name(&name)
                && sequence >= from
            {
                tokio::fs::remove_file(entry.path()).await?;
                removed.push(sequence);
            }
        }
        removed.sort_unstable();
        tracing::info!(target: "persist.io", from, count = removed.len(), "deltas_removed");
        Ok(removed)
    }

    // ---- deletion audit -------------------------------------------------

    pub async fn write_deletion_record(
        &self,
        record: &DeletionRecord,
    ) -> Result<PathBuf, PersistError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = self
            .root
            .join(DELETIONS_DIR)
            .join(format!("deletion-{}-{}.json", record.from_sequence, stamp));
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|source| PersistError::Malformed {
                path: path.clone(),
                source,
            })?;
        self.write_atomic(&path, bytes).await?;
        Ok(path)
    }

    // ---- primitives -----------------------------------------------------

    /// Write `bytes` to `path` via a sibling tmp file and rename, holding
    /// the per-path lock for the duration.
    pub async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), PersistError> {
        let lock = {
            let mut locks = self.locks.borrow_mut();
            Rc::clone(
                locks
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Rc::new(Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.root)
            .finish()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// `snapshot-<sequence>-<timestamp>.json` → (sequence, timestamp).
fn parse_snapshot_name(name: &str) -> Option<(u64, String)> {
    let stem = name.strip_prefix("snapshot-")?.strip_suffix(".json")?;
    let (sequence, stamp) = stem.split_once('-')?;
    Some((sequence.parse().ok()?, stamp.to_string()))
}

/// `delta-<sequence>.json` → sequence.
fn parse_delta_name(name: &str) -> Option<u64> {
    name.strip_prefix("delta-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}
