//! Snapshot persistence for the crash store.
//!
//! The store serializes to a single versioned JSON file, `store.json`,
//! inside the configured store directory. Writes go to a temp file first and
//! are renamed into place so a crash mid-write never leaves a torn snapshot.
//! Loading is self-healing: a missing, corrupt or version-mismatched
//! snapshot yields an empty store with a log line, never an error.

use crate::error::StoreError;
use crate::store::{CrashRecord, CrashStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bump when the snapshot layout changes; older snapshots are discarded.
const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "store.json";

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    crashes: Vec<CrashRecord>,
    counts_by_day: BTreeMap<NaiveDate, HashMap<String, u32>>,
}

/// Path of the snapshot file inside a store directory.
pub fn snapshot_path(store_dir: &Path) -> PathBuf {
    store_dir.join(SNAPSHOT_FILE)
}

/// Load the store from its snapshot, or start empty when there is nothing
/// usable on disk.
pub async fn load(store_dir: &Path) -> CrashStore {
    let path = snapshot_path(store_dir);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No store snapshot, starting empty");
            return CrashStore::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to read store snapshot, starting empty");
            return CrashStore::new();
        }
    };

    let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Corrupt store snapshot, starting empty");
            return CrashStore::new();
        }
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(
            path = %path.display(),
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "Unsupported store snapshot version, starting empty"
        );
        return CrashStore::new();
    }

    debug!(crashes = snapshot.crashes.len(), "Loaded store snapshot");
    CrashStore::from_parts(snapshot.crashes, snapshot.counts_by_day)
}

/// Write the store snapshot atomically (temp file, then rename).
pub async fn save(store: &CrashStore, store_dir: &Path) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(store_dir).await?;

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        crashes: store.records.clone(),
        counts_by_day: store.counts_by_day.clone(),
    };
    let serialized = serde_json::to_vec(&snapshot)?;

    let path = snapshot_path(store_dir);
    let temp_path = store_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
    tokio::fs::write(&temp_path, &serialized).await?;
    if let Err(err) = tokio::fs::rename(&temp_path, &path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }

    debug!(path = %path.display(), crashes = store.len(), "Saved store snapshot");
    Ok(())
}
