//! Integration tests for pending and submitted dump discovery

use super::test_utils::{date, TestManager};
use chrono::Duration as ChronoDuration;
use crashtrack::config::ManagerConfig;
use crashtrack::manager::CrashManager;

/// Pending dumps come back newest first with the `.dmp` suffix stripped;
/// files outside the naming convention are skipped.
#[tokio::test]
async fn test_pending_dumps_newest_first() {
    let t = TestManager::new();
    let base = date("2024-03-01T10:00:00Z");

    let mut ids = Vec::new();
    for i in 0..5i64 {
        ids.push(t.create_dummy_dump(false, base + ChronoDuration::minutes(i), false));
    }
    t.create_ignored_dump_file("ignored", false);

    let dumps = t.manager.pending_dumps().await;
    assert_eq!(dumps.len(), 5);

    let newest_first: Vec<&String> = ids.iter().rev().collect();
    for (dump, id) in dumps.iter().zip(newest_first) {
        assert_eq!(&dump.id, id);
    }
    for pair in dumps.windows(2) {
        assert!(pair[0].date >= pair[1].date);
    }
}

/// Submitted receipts strip the `bp-` prefix and the optional `hr-` marker.
#[tokio::test]
async fn test_submitted_dumps_strip_prefixes() {
    let t = TestManager::new();
    let base = date("2024-03-01T10:00:00Z");
    let plain = t.create_dummy_dump(true, base, false);
    let hr = t.create_dummy_dump(true, base + ChronoDuration::minutes(1), true);
    t.create_ignored_dump_file("ignored", true);

    let dumps = t.manager.submitted_dumps().await;
    assert_eq!(dumps.len(), 2);
    assert_eq!(dumps[0].id, hr);
    assert_eq!(dumps[1].id, plain);
}

/// Dump directories that were never created yield empty listings.
#[tokio::test]
async fn test_missing_dump_dirs_yield_empty() {
    let root = tempfile::TempDir::new().unwrap();
    let config = ManagerConfig::new(
        root.path().join("missing-pending"),
        root.path().join("missing-submitted"),
        vec![],
        root.path().join("store"),
    );
    let manager = CrashManager::new(config).unwrap();

    assert!(manager.pending_dumps().await.is_empty());
    assert!(manager.submitted_dumps().await.is_empty());
}
