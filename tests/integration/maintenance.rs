//! Integration tests for maintenance passes and their scheduling

use super::test_utils::{TestManager, CRASH_ID};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

/// One maintenance pass folds event files in and prunes expired records.
#[tokio::test]
async fn test_run_maintenance_aggregates_and_prunes() {
    let t = TestManager::new();
    let stale = Utc::now() - ChronoDuration::days(200);
    t.create_events_file(0, "crash.main.3", stale, "stale-crash\n");
    t.create_events_file(1, "crash.main.3", Utc::now(), &format!("{}\n", CRASH_ID));

    t.manager.run_maintenance().await;

    assert!(
        t.manager.get_crash("stale-crash").await.is_none(),
        "record older than the purge age must be pruned"
    );
    assert!(t.manager.get_crash(CRASH_ID).await.is_some());
    assert_eq!(t.manager.crashes_count().await, 1);
}

/// A delayed one-shot maintenance task runs a full pass and finishes.
#[tokio::test]
async fn test_schedule_maintenance_runs_once() {
    let t = TestManager::new();
    let stale = Utc::now() - ChronoDuration::days(200);
    t.create_events_file(0, "crash.main.3", stale, "stale-crash\n");

    let handle = t.manager.schedule_maintenance(Duration::from_millis(50));
    handle.await.unwrap();

    assert_eq!(std::fs::read_dir(t.events_dir(0)).unwrap().count(), 0);
    assert!(t.manager.get_crash("stale-crash").await.is_none());
}

/// The periodic task keeps aggregating until its handle is aborted.
#[tokio::test]
async fn test_spawn_maintenance_ticks() {
    let t = TestManager::new();
    t.create_events_file(0, "crash.main.3", Utc::now(), &format!("{}\n", CRASH_ID));

    let handle = t.manager.spawn_maintenance(Duration::from_millis(100));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if t.manager.get_crash(CRASH_ID).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("a maintenance tick must pick up the crash event");

    handle.abort();
}
