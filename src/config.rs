//! Construction-time configuration for a crash manager instance.
//!
//! The externally visible surface is exactly four directory settings; any
//! unrecognized key fails deserialization so an embedder typo cannot silently
//! redirect crash data. Runtime tunables (expiration window, prune age) are
//! not part of the external surface and carry defaults.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default idle window after which the in-memory store is saved and dropped.
pub const DEFAULT_STORE_EXPIRATION: Duration = Duration::from_secs(60);

/// Default age, in days, past which maintenance prunes crash records.
pub const DEFAULT_PURGE_AGE_DAYS: i64 = 180;

/// Directory layout and tunables for a [`crate::manager::CrashManager`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManagerConfig {
    /// Directory holding minidumps that have not been submitted yet.
    pub pending_dumps_dir: PathBuf,

    /// Directory holding submission receipts for already-submitted dumps.
    pub submitted_dumps_dir: PathBuf,

    /// Directories scanned for crash event files. May be empty.
    pub events_dirs: Vec<PathBuf>,

    /// Directory holding the persisted store snapshot.
    pub store_dir: PathBuf,

    /// Idle window before the in-memory store is flushed and dropped.
    /// Not part of the external configuration surface.
    #[serde(skip, default = "default_store_expiration")]
    pub store_expiration: Duration,

    /// Records older than this many days are removed during maintenance.
    /// Not part of the external configuration surface.
    #[serde(skip, default = "default_purge_age_days")]
    pub purge_age_days: i64,
}

fn default_store_expiration() -> Duration {
    DEFAULT_STORE_EXPIRATION
}

fn default_purge_age_days() -> i64 {
    DEFAULT_PURGE_AGE_DAYS
}

impl ManagerConfig {
    /// Build a config from explicit directories with default tunables.
    pub fn new(
        pending_dumps_dir: impl Into<PathBuf>,
        submitted_dumps_dir: impl Into<PathBuf>,
        events_dirs: Vec<PathBuf>,
        store_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pending_dumps_dir: pending_dumps_dir.into(),
            submitted_dumps_dir: submitted_dumps_dir.into(),
            events_dirs,
            store_dir: store_dir.into(),
            store_expiration: DEFAULT_STORE_EXPIRATION,
            purge_age_days: DEFAULT_PURGE_AGE_DAYS,
        }
    }

    /// Parse a JSON configuration document. Unknown keys are rejected.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validate directory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_dumps_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "pendingDumpsDir cannot be empty".to_string(),
            ));
        }
        if self.submitted_dumps_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "submittedDumpsDir cannot be empty".to_string(),
            ));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storeDir cannot be empty".to_string()));
        }
        if self.events_dirs.iter().any(|d| d.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(
                "eventsDirs entries cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
