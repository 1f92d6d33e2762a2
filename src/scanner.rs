//! Directory scanning for crash event files and minidump entries.
//!
//! Scanning is read-only and tolerant: a missing directory contributes an
//! empty listing, unreadable entries are skipped with a log line, and nothing
//! here deletes files.

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An event file waiting to be aggregated. `date` is the file's modification
/// time and becomes the event date.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFileEntry {
    pub path: PathBuf,
    pub name: String,
    pub date: DateTime<Utc>,
}

/// A minidump (or submission receipt) found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpEntry {
    pub id: String,
    pub path: PathBuf,
    pub date: DateTime<Utc>,
}

/// List every readable file in the given events directories, oldest first by
/// modification time (name as tiebreaker) so replay order is deterministic.
pub async fn unprocessed_event_files(dirs: &[PathBuf]) -> Vec<EventFileEntry> {
    let mut entries = Vec::new();
    for dir in dirs {
        for (name, path, date) in list_files(dir).await {
            entries.push(EventFileEntry { path, name, date });
        }
    }
    entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// List pending minidumps (`<id>.dmp`), newest first.
pub async fn pending_dump_entries(dir: &Path) -> Vec<DumpEntry> {
    collect_dumps(dir, |name| {
        name.strip_suffix(".dmp").map(|id| id.to_string())
    })
    .await
}

/// List submitted-dump receipts (`bp-<id>.txt`, with an optional `hr-`
/// marker after the prefix), newest first. The recovered id excludes both
/// markers.
pub async fn submitted_dump_entries(dir: &Path) -> Vec<DumpEntry> {
    collect_dumps(dir, |name| {
        let rest = name.strip_prefix("bp-")?.strip_suffix(".txt")?;
        let id = rest.strip_prefix("hr-").unwrap_or(rest);
        Some(id.to_string())
    })
    .await
}

async fn collect_dumps<F>(dir: &Path, recognize: F) -> Vec<DumpEntry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut entries = Vec::new();
    for (name, path, date) in list_files(dir).await {
        match recognize(&name) {
            Some(id) => entries.push(DumpEntry { id, path, date }),
            None => debug!(file = %name, "Skipping file outside the dump naming convention"),
        }
    }
    entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
    entries
}

/// Flat listing of one directory: regular files only, with names and mtimes.
async fn list_files(dir: &Path) -> Vec<(String, PathBuf, DateTime<Utc>)> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Directory does not exist, treating as empty");
            return Vec::new();
        }
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Failed to read directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Failed to read directory entry");
                break;
            }
        };
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %entry.path().display(), error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                debug!(path = %entry.path().display(), error = %err, "Skipping entry without mtime");
                continue;
            }
        };
        files.push((
            entry.file_name().to_string_lossy().into_owned(),
            entry.path(),
            DateTime::<Utc>::from(modified),
        ));
    }
    files
}
