//! Host configuration: `synapse.toml` parsing and discovery.
//!
//! Discovery prefers a local `synapse.toml` in the working directory, then
//! the platform config dir (`<config>/synapse/synapse.toml`). A missing file
//! yields defaults; unknown fields are ignored so the file format can grow
//! without breaking older binaries. CLI flags override file values after
//! parsing (`Config::override_storage_dir`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PersistenceSection {
    pub enabled: bool,
    pub storage_dir: PathBuf,
    pub snapshot_interval: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            storage_dir: PathBuf::from("synapse-data"),
            snapshot_interval: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DebugSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8320,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsoleSection {
    pub enabled: bool,
}

impl Default for ConsoleSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ConfigFile {
    pub persistence: PersistenceSection,
    pub debug: DebugSection,
    pub console: ConsoleSection,
    /// Opaque provider handles by id, exposed as `provider:<id>` references.
    pub providers: BTreeMap<String, String>,
    /// Secrets by name, exposed as `secret:<name>` references.
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    /// Original file contents, when a file was read.
    pub raw: Option<String>,
    pub file: ConfigFile,
}

impl Config {
    pub fn override_storage_dir(&mut self, dir: Option<PathBuf>) {
        if let Some(dir) = dir {
            self.file.persistence.storage_dir = dir;
        }
    }
}

/// Best-effort config path following platform conventions.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("synapse.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("synapse").join("synapse.toml");
    }
    PathBuf::from("synapse.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let file: ConfigFile = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("parse `{}`: {e}", path.display()))?;
            info!(target: "config", path = %path.display(), "config_loaded");
            Ok(Config {
                raw: Some(content),
                file,
            })
        }
        Err(_) => {
            info!(target: "config", path = %path.display(), "config_missing_using_defaults");
            Ok(Config::default())
        }
    }
}
