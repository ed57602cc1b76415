//! Store configuration via `revdb.toml`
//!
//! A store reads its settings from a small TOML file. On first open a
//! commented default file is written; to change settings, edit the file
//! and reopen the store.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use revdb_core::limits::{DEFAULT_REVS_LIMIT, DEFAULT_TXN_TIMEOUT_MS};
use revdb_core::{Error, Result};
use tracing::debug;

/// Config file name placed next to the store.
pub const CONFIG_FILE_NAME: &str = "revdb.toml";

/// Store configuration loaded from `revdb.toml`.
///
/// # Example
///
/// ```toml
/// revs_limit = 1000
/// auto_compaction = false
/// deterministic_revs = true
/// txn_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Generations of history that keep a body. Must be at least 1.
    #[serde(default = "default_revs_limit")]
    pub revs_limit: u64,
    /// Drop every non-leaf body on each write.
    #[serde(default)]
    pub auto_compaction: bool,
    /// Derive new revision hashes from document content instead of at random.
    #[serde(default = "default_true")]
    pub deterministic_revs: bool,
    /// How long a bulk write waits for its transaction, in milliseconds.
    #[serde(default = "default_txn_timeout_ms")]
    pub txn_timeout_ms: u64,
}

fn default_revs_limit() -> u64 {
    DEFAULT_REVS_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_txn_timeout_ms() -> u64 {
    DEFAULT_TXN_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            revs_limit: default_revs_limit(),
            auto_compaction: false,
            deterministic_revs: true,
            txn_timeout_ms: default_txn_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Reject values the store cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `revs_limit` or `txn_timeout_ms` is 0.
    pub fn validate(&self) -> Result<()> {
        if self.revs_limit == 0 {
            return Err(Error::InvalidConfig(
                "revs_limit must be at least 1".to_string(),
            ));
        }
        if self.txn_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "txn_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Transaction timeout as a `Duration`
    pub fn txn_timeout(&self) -> Duration {
        Duration::from_millis(self.txn_timeout_ms)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# revdb store configuration
#
# Generations of history that keep a revision body (default: 1000).
# Older ancestors keep their place in the revision tree but lose their body.
revs_limit = 1000

# Drop the body of every non-leaf revision on each write (default: false).
auto_compaction = false

# Derive new revision hashes from document content (default: true).
# When false, hashes are random.
deterministic_revs = true

# How long a bulk write waits to open its transaction, in milliseconds.
txn_timeout_ms = 5000
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        debug!(target: "revdb::config", path = %path.display(), ?config, "Loaded store config");
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::InvalidConfig(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            debug!(target: "revdb::config", path = %path.display(), "Wrote default store config");
        }
        Ok(())
    }

    /// Load the config at `path`, writing the default first if absent.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        Self::write_default_if_missing(path)?;
        Self::from_file(path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
