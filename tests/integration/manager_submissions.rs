//! Integration tests for submission tracking

use super::test_utils::{date, TestManager, CRASH_ID};
use chrono::Utc;
use crashtrack::manager::generate_submission_id;
use crashtrack::process::CrashKind;
use crashtrack::store::SubmissionStatus;
use serde_json::Map;
use std::time::Duration;

/// A submission event arriving before any crash event creates a placeholder
/// record carrying only submission state.
#[tokio::test]
async fn test_submission_before_crash_creates_placeholder() {
    let t = TestManager::new();
    let ts = date("2024-03-01T10:00:00Z");
    t.create_events_file(
        0,
        "crash.submission.1",
        ts,
        &format!("{}\ntrue\nbp-2", CRASH_ID),
    );

    assert_eq!(t.manager.aggregate_events_files().await, 1);

    let record = t.manager.get_crash(CRASH_ID).await.unwrap();
    assert!(record.crash_type.is_none());
    assert!(record.crash_date.is_none());
    assert_eq!(record.remote_id.as_deref(), Some("bp-2"));
    assert_eq!(record.submissions.len(), 1);

    let submission = record.submissions.iter().next().unwrap();
    assert!(submission.id.starts_with("sub-"));
    assert_eq!(submission.result, SubmissionStatus::Ok);
    assert_eq!(submission.request_date, ts);
    assert_eq!(submission.response_date, Some(ts));

    // Placeholders never ping.
    assert!(t.pings.is_empty());
}

/// A failed submission records the failure and leaves the remote id unset,
/// even when a remote line is present.
#[tokio::test]
async fn test_failed_submission_keeps_remote_id_unset() {
    let t = TestManager::new();
    let ts = date("2024-03-01T10:00:00Z");
    t.create_events_file(
        0,
        "crash.submission.1",
        ts,
        &format!("{}\nfalse\nbp-should-not-stick", CRASH_ID),
    );

    assert_eq!(t.manager.aggregate_events_files().await, 1);

    let record = t.manager.get_crash(CRASH_ID).await.unwrap();
    assert!(record.remote_id.is_none());
    let submission = record.submissions.iter().next().unwrap();
    assert_eq!(submission.result, SubmissionStatus::Failed);
}

/// A result line that is neither "true" nor "false" makes the file
/// malformed; it is consumed without touching the store.
#[tokio::test]
async fn test_non_boolean_result_line_rejected() {
    let t = TestManager::new();
    t.create_events_file(
        0,
        "crash.submission.1",
        date("2024-03-01T10:00:00Z"),
        &format!("{}\nmaybe", CRASH_ID),
    );

    assert_eq!(t.manager.aggregate_events_files().await, 1);
    assert_eq!(t.manager.crashes_count().await, 0);
}

/// The programmatic attempt/result flow keeps both dates and converges with
/// the file-derived path.
#[tokio::test]
async fn test_programmatic_attempt_then_result() {
    let t = TestManager::new();
    let requested = date("2024-03-01T10:00:00Z");
    let responded = date("2024-03-01T10:05:00Z");

    t.manager
        .add_crash("main", CrashKind::Crash, CRASH_ID, requested, Map::new())
        .await;

    let submission_id = generate_submission_id();
    t.manager
        .add_submission_attempt(CRASH_ID, &submission_id, requested)
        .await;
    t.manager
        .add_submission_result(CRASH_ID, &submission_id, responded, SubmissionStatus::Ok)
        .await;
    t.manager.set_remote_crash_id(CRASH_ID, "bp-remote-9").await;

    let record = t.manager.get_crash(CRASH_ID).await.unwrap();
    let submission = record.submissions.get(&submission_id).unwrap();
    assert_eq!(submission.request_date, requested);
    assert_eq!(submission.response_date, Some(responded));
    assert_eq!(submission.result, SubmissionStatus::Ok);
    assert_eq!(record.remote_id.as_deref(), Some("bp-remote-9"));
}

/// Classifications replace the previous set wholesale.
#[tokio::test]
async fn test_set_crash_classifications_replaces() {
    let t = TestManager::new();
    t.manager
        .set_crash_classifications(CRASH_ID, vec!["skip-a".to_string(), "skip-b".to_string()])
        .await;
    t.manager
        .set_crash_classifications(CRASH_ID, vec!["final".to_string()])
        .await;

    let record = t.manager.get_crash(CRASH_ID).await.unwrap();
    assert_eq!(record.classifications, ["final"]);
}

/// ensure_crash_is_present parks until aggregation creates the record.
#[tokio::test]
async fn test_ensure_crash_is_present_wakes_on_aggregation() {
    let t = TestManager::new();
    t.create_events_file(0, "crash.main.3", Utc::now(), &format!("{}\n", CRASH_ID));

    let manager = t.manager.clone();
    let waiter = tokio::spawn(async move {
        manager.ensure_crash_is_present(CRASH_ID).await;
    });

    // Let the waiter register before the record exists.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    t.manager.aggregate_events_files().await;
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter must be woken by aggregation")
        .unwrap();
}
