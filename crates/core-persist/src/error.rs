//! Storage faults.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed persistence file `{path}`: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unreadable persistence filename `{name}`")]
    BadFilename { name: String },

    #[error("snapshot `{path}` was written by serializer version {found}, newer than supported {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}
