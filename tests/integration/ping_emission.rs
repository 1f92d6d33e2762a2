//! Integration tests for crash ping emission and delivery sinks

use super::test_utils::{date, TestManager, CRASH_ID};
use crashtrack::ping::{ArchiveSink, MetricsSink};
use crashtrack::process::CrashKind;
use crashtrack::store::SubmissionStatus;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const SHA256_HASH: &str = "f8410c3ac4496cfa9191a1240f0e365101aef40c7bf34fc5bcb8ec511832ed79";
const SESSION_ID: &str = "574a6d1b-6ee1-4dd9-9d97-3380fa5f0e3a";

fn fixture_metadata() -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("ProductName".to_string(), "Firefox".into());
    metadata.insert(
        "ProductID".to_string(),
        "{ec8030f7-c20a-464f-9b0e-13a3a9e97384}".into(),
    );
    metadata.insert(
        "TelemetryEnvironment".to_string(),
        r#"{"gfx":{"hdd":"ssd"}}"#.into(),
    );
    metadata.insert("TelemetrySessionId".to_string(), SESSION_ID.into());
    metadata.insert("MinidumpSha256Hash".to_string(), SHA256_HASH.into());
    metadata.insert("StackTraces".to_string(), json!({"status": "OK"}));
    metadata.insert("ThisShouldNot".to_string(), "appear in the ping".into());
    metadata
}

/// The ping carries the allowlisted metadata, the lifted special fields and
/// a minute-truncated crash time.
#[tokio::test]
async fn test_ping_payload_fields() {
    let t = TestManager::new();
    t.manager
        .add_crash(
            "main",
            CrashKind::Crash,
            CRASH_ID,
            date("2024-03-01T12:34:56.789Z"),
            fixture_metadata(),
        )
        .await;

    let pings = t.pings.pings();
    assert_eq!(pings.len(), 1);
    let ping = &pings[0];

    assert_eq!(ping.crash_id, CRASH_ID);
    assert_eq!(ping.process_type, "main");
    assert_eq!(ping.crash_time, date("2024-03-01T12:34:00Z"));
    assert!(ping.has_crash_environment);
    let environment = ping.environment.as_ref().unwrap();
    assert_eq!(environment["gfx"]["hdd"], "ssd");
    assert_eq!(ping.session_id.as_deref(), Some(SESSION_ID));
    assert_eq!(ping.minidump_sha256_hash.as_deref(), Some(SHA256_HASH));
    assert_eq!(ping.stack_traces.as_ref().unwrap()["status"], "OK");

    assert_eq!(ping.metadata["ProductName"], "Firefox");
    assert_eq!(
        ping.metadata["ProductID"],
        "{ec8030f7-c20a-464f-9b0e-13a3a9e97384}"
    );
    assert!(!ping.metadata.contains_key("ThisShouldNot"));
    assert!(!ping.metadata.contains_key("TelemetrySessionId"));
    assert!(!ping.metadata.contains_key("TelemetryEnvironment"));

    // The stored record keeps the full metadata, allowlist or not.
    let record = t.manager.get_crash(CRASH_ID).await.unwrap();
    assert!(record.metadata.contains_key("ThisShouldNot"));
}

/// One ping per record, emitted when the record first gains a crash type.
#[tokio::test]
async fn test_ping_emitted_once_per_crash() {
    let t = TestManager::new();
    let ts = date("2024-03-01T10:00:00Z");

    // Submission first: placeholder record, no ping yet.
    t.manager.add_submission_attempt(CRASH_ID, "sub-1", ts).await;
    assert!(t.pings.is_empty());

    // First genuine crash information pings.
    t.manager
        .add_crash("main", CrashKind::Crash, CRASH_ID, ts, Map::new())
        .await;
    assert_eq!(t.pings.len(), 1);

    // Later updates never re-ping.
    t.manager
        .add_crash("main", CrashKind::Crash, CRASH_ID, ts, Map::new())
        .await;
    t.manager
        .add_submission_result(CRASH_ID, "sub-1", ts, SubmissionStatus::Ok)
        .await;
    assert_eq!(t.pings.len(), 1);
}

/// Crashes folded in from event files ping through the same path as
/// programmatic adds.
#[tokio::test]
async fn test_aggregation_emits_pings() {
    let t = TestManager::new();
    t.create_events_file(
        0,
        "crash.main.3",
        date("2024-03-01T10:00:00Z"),
        &format!("{}\n{{\"StartupCrash\": \"1\"}}", CRASH_ID),
    );

    t.manager.aggregate_events_files().await;

    assert_eq!(t.pings.len(), 1);
    assert!(t.pings.pings()[0].startup_crash());
}

/// Recordable-but-unpingable process types produce a record and no ping.
#[tokio::test]
async fn test_ipdlunittest_records_without_ping() {
    let t = TestManager::new();
    let added = t
        .manager
        .add_crash(
            "ipdlunittest",
            CrashKind::Crash,
            CRASH_ID,
            date("2024-03-01T10:00:00Z"),
            Map::new(),
        )
        .await;

    assert!(added);
    assert!(t.manager.get_crash(CRASH_ID).await.is_some());
    assert!(t.pings.is_empty());
}

/// Every registered sink receives every ping with the same content.
#[tokio::test]
async fn test_all_sinks_receive_equivalent_payloads() {
    let t = TestManager::new();
    let metrics = Arc::new(MetricsSink::new());
    let archive = Arc::new(ArchiveSink::new(t.store_dir().join("ping-archive")));
    t.manager.add_ping_sink(metrics.clone());
    t.manager.add_ping_sink(archive.clone());

    let mut metadata = Map::new();
    metadata.insert("StartupCrash".to_string(), "1".into());
    metadata.insert("UptimeTS".to_string(), "600.1".into());
    t.manager
        .add_crash(
            "content",
            CrashKind::Crash,
            CRASH_ID,
            date("2024-03-01T12:34:56Z"),
            metadata,
        )
        .await;

    assert_eq!(t.pings.len(), 1);
    let ping = &t.pings.pings()[0];
    assert_eq!(ping.process_type, "content");

    assert_eq!(metrics.count("content"), 1);
    let recorded = metrics.metrics();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].startup);
    assert_eq!(recorded[0].uptime_ms, Some(600.1 * 1000.0));
    assert_eq!(recorded[0].time, ping.crash_time);

    let raw = std::fs::read_to_string(archive.archive_path(CRASH_ID)).unwrap();
    let archived: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(archived["crashId"], CRASH_ID);
    assert_eq!(archived["processType"], "content");
    assert_eq!(archived["metadata"]["StartupCrash"], "1");
}
