//! Manager configuration via `vigil.toml`
//!
//! A simple config file in the storage root directory. On first initialize,
//! a commented default `vigil.toml` is created. To change settings, edit the
//! file and restart — same model as Redis.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vigil_core::{Error, Result};
use vigil_storage::SyncMode;

/// Config file name placed in the storage root directory.
pub const CONFIG_FILE_NAME: &str = "vigil.toml";

/// Manager configuration loaded from `vigil.toml`.
///
/// # Example
///
/// ```toml
/// # Sync mode: "buffered" (default) or "immediate"
/// sync = "buffered"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Write durability: `"buffered"` or `"immediate"`.
    #[serde(default = "default_sync_str")]
    pub sync: String,
}

fn default_sync_str() -> String {
    "buffered".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sync: default_sync_str(),
        }
    }
}

impl ManagerConfig {
    /// Parse the sync string into a [`SyncMode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"buffered"` or `"immediate"`.
    pub fn sync_mode(&self) -> Result<SyncMode> {
        match self.sync.as_str() {
            "buffered" => Ok(SyncMode::Buffered),
            "immediate" => Ok(SyncMode::Immediate),
            other => Err(Error::storage(format!(
                "invalid sync mode '{other}' in {CONFIG_FILE_NAME}. Expected \"buffered\" or \"immediate\"."
            ))),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Vigil KVDB manager configuration
#
# Sync mode: "buffered" (default) or "immediate"
#   "buffered"  = commits fsync eventually; fast, a crash may lose the
#                 last few writes
#   "immediate" = every commit fsyncs before returning, zero data loss
sync = "buffered"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// field fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("read config '{}': {e}", path.display())))?;
        let config: ManagerConfig = toml::from_str(&content)
            .map_err(|e| Error::storage(format!("parse config '{}': {e}", path.display())))?;
        // Validate the sync value eagerly
        config.sync_mode()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::storage(format!("write default config '{}': {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::storage(format!("serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| Error::storage(format!("write config '{}': {e}", path.display())))
    }

    /// Load the config from `root`, writing a commented default first when
    /// the file is missing.
    pub fn load_or_init(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        Self::from_file(&path)
    }
}
