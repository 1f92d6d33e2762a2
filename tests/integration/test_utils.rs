//! Shared test utilities for integration tests
//!
//! Builds a fully wired manager over a throwaway directory layout and
//! provides helpers for planting event files and dump files with controlled
//! modification times.

use chrono::{DateTime, Utc};
use crashtrack::config::ManagerConfig;
use crashtrack::manager::CrashManager;
use crashtrack::ping::MemorySink;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// The crash id used throughout the fixtures.
pub const CRASH_ID: &str = "3cb67eba-0dc7-6f78-6a569a0e-172287ec";

/// A manager wired over a temporary directory tree (pending, submitted, two
/// events directories, store), with an in-memory ping sink attached.
pub struct TestManager {
    pub manager: CrashManager,
    pub pings: Arc<MemorySink>,
    root: TempDir,
}

impl TestManager {
    /// Manager with the default idle expiration, which never fires within a
    /// test's lifetime.
    pub fn new() -> Self {
        Self::with_expiration(Duration::from_secs(60))
    }

    /// Manager whose store unloads after the given idle window.
    pub fn with_expiration(expiration: Duration) -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path();

        let events_dirs = vec![base.join("events-1"), base.join("events-2")];
        for dir in &events_dirs {
            fs::create_dir_all(dir).unwrap();
        }
        for name in ["pending", "submitted", "store"] {
            fs::create_dir_all(base.join(name)).unwrap();
        }

        let mut config = ManagerConfig::new(
            base.join("pending"),
            base.join("submitted"),
            events_dirs,
            base.join("store"),
        );
        config.store_expiration = expiration;

        let manager = CrashManager::new(config).unwrap();
        let pings = Arc::new(MemorySink::new());
        manager.add_ping_sink(pings.clone());

        Self {
            manager,
            pings,
            root,
        }
    }

    /// The `index`-th events directory (0 or 1).
    pub fn events_dir(&self, index: usize) -> PathBuf {
        self.root.path().join(format!("events-{}", index + 1))
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.path().join("pending")
    }

    pub fn submitted_dir(&self) -> PathBuf {
        self.root.path().join("submitted")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.path().join("store")
    }

    /// Plant an event file named `kind` in one of the events directories,
    /// with its modification time forced to `date`.
    pub fn create_events_file(&self, dir_index: usize, kind: &str, date: DateTime<Utc>, body: &str) {
        let path = self.events_dir(dir_index).join(kind);
        fs::write(&path, body).unwrap();
        set_mtime(&path, date);
    }

    /// Plant a dump file and return its generated id. Pending dumps are
    /// `<id>.dmp`; submitted receipts are `bp-<id>.txt`, or `bp-hr-<id>.txt`
    /// with the `hr` marker.
    pub fn create_dummy_dump(&self, submitted: bool, date: DateTime<Utc>, hr: bool) -> String {
        let id = Uuid::new_v4().to_string();
        let path = if submitted {
            let marker = if hr { "hr-" } else { "" };
            self.submitted_dir().join(format!("bp-{}{}.txt", marker, id))
        } else {
            self.pending_dir().join(format!("{}.dmp", id))
        };
        fs::write(&path, "dump contents").unwrap();
        set_mtime(&path, date);
        id
    }

    /// Plant a file the dump scanners must skip.
    pub fn create_ignored_dump_file(&self, name: &str, submitted: bool) {
        let dir = if submitted {
            self.submitted_dir()
        } else {
            self.pending_dir()
        };
        fs::write(dir.join(name), "ignored").unwrap();
    }
}

/// Force a file's modification time.
pub fn set_mtime(path: &Path, date: DateTime<Utc>) {
    let mtime = FileTime::from_unix_time(date.timestamp(), date.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, mtime).unwrap();
}

/// Parse an RFC 3339 timestamp.
pub fn date(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}
