//! Persisted plugin configuration store
//!
//! A flat JSON mapping of plugin id to config record. Every save rewrites
//! the whole file so external inspection or a process restart always sees
//! the latest accepted configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::plugins::PluginConfig;
use crate::{Error, Result};

/// Loads and saves the plugin config file
#[derive(Debug, Clone)]
pub struct PluginConfigStore {
    path: PathBuf,
}

impl PluginConfigStore {
    /// Create a store backed by the given file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all plugin configs
    ///
    /// A missing file is an empty store, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] when the file cannot be read or parsed.
    pub fn load(&self) -> Result<HashMap<String, PluginConfig>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Persistence(format!("reading {}: {e}", self.path.display()))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            Error::Persistence(format!("parsing {}: {e}", self.path.display()))
        })
    }

    /// Write all plugin configs, replacing the file contents
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] when the file cannot be written.
    pub fn save(&self, configs: &HashMap<String, PluginConfig>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let raw = serde_json::to_string_pretty(configs).map_err(|e| {
            Error::Persistence(format!("serializing plugin configs: {e}"))
        })?;

        std::fs::write(&self.path, raw).map_err(|e| {
            Error::Persistence(format!("writing {}: {e}", self.path.display()))
        })?;

        tracing::debug!(path = %self.path.display(), count = configs.len(), "plugin configs saved");
        Ok(())
    }
}
