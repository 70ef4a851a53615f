//! Lifecycle-scoped persistence: snapshot + delta-log file formats and the
//! storage adapter that reads and writes them.
//!
//! On-disk layout under the storage directory:
//!
//! ```text
//! storage/
//!   lifecycle                      current lifecycle id (decimal text)
//!   snapshots/snapshot-<sequence>-<timestamp>.json
//!   deltas/delta-<sequence>.json
//!   deletions/deletion-<sequence>-<timestamp>.json
//! ```
//!
//! All writes are atomic (tmp file + rename) and serialized per path, so a
//! crash mid-write never corrupts an existing file. The runtime half (the
//! persistence maintainer and restoration) lives in `core-space`; this crate
//! knows only files.

pub mod error;
pub mod files;
pub mod storage;

pub use error::PersistError;
pub use files::{DeletionRecord, DeltaFile, SNAPSHOT_VERSION, SnapshotFile};
pub use storage::FileStorage;
