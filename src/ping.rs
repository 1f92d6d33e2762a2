//! Crash ping payloads and delivery sinks.
//!
//! A `CrashPing` is built from one record snapshot: special metadata keys
//! are lifted to top-level fields, everything else passes through a fixed
//! allowlist so free-form annotations never leave the process. Delivery goes
//! through the `PingSink` trait; the manager hands the same payload to every
//! registered sink.

use crate::error::PingError;
use crate::store::CrashRecord;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Metadata keys that may appear in a ping. Everything else is dropped at
/// ping-build time; the store record itself keeps all keys.
pub const PING_METADATA_ALLOWLIST: &[&str] = &[
    "AsyncShutdownTimeout",
    "AvailablePageFile",
    "AvailablePhysicalMemory",
    "AvailableSwapMemory",
    "AvailableVirtualMemory",
    "BackgroundTaskMode",
    "BuildID",
    "CrashTime",
    "EventLoopNestingLevel",
    "HeadlessMode",
    "IsGarbageCollecting",
    "MozCrashReason",
    "OOMAllocationSize",
    "ProductID",
    "ProductName",
    "ReleaseChannel",
    "RemoteType",
    "SecondsSinceLastCrash",
    "ShutdownProgress",
    "StartupCrash",
    "StartupTime",
    "SystemMemoryUsePercentage",
    "TotalPageFile",
    "TotalPhysicalMemory",
    "TotalVirtualMemory",
    "UptimeTS",
    "Version",
    "ipc_channel_error",
];

/// Metadata keys lifted out of the map into dedicated payload fields.
const KEY_ENVIRONMENT: &str = "TelemetryEnvironment";
const KEY_SESSION_ID: &str = "TelemetrySessionId";
const KEY_STACK_TRACES: &str = "StackTraces";
const KEY_MINIDUMP_SHA256: &str = "MinidumpSha256Hash";

/// The payload handed to every delivery sink for one new crash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashPing {
    pub crash_id: String,
    pub process_type: String,
    /// Crash time truncated to the minute; the record keeps full precision.
    pub crash_time: DateTime<Utc>,
    pub has_crash_environment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_traces: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minidump_sha256_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CrashPing {
    /// Build the ping for a record, or `None` when the record must not ping:
    /// placeholders without crash info, and process types outside the
    /// allowed set.
    pub fn from_record(record: &CrashRecord) -> Option<CrashPing> {
        let crash_type = record.crash_type?;
        if !crash_type.process.ping_allowed() {
            return None;
        }
        let crash_date = record.crash_date?;

        let mut metadata = Map::new();
        let mut environment = None;
        let mut session_id = None;
        let mut stack_traces = None;
        let mut minidump_sha256_hash = None;

        for (key, value) in &record.metadata {
            match key.as_str() {
                KEY_ENVIRONMENT => environment = parse_environment(&record.id, value),
                KEY_SESSION_ID => session_id = value.as_str().map(str::to_string),
                KEY_STACK_TRACES => stack_traces = Some(value.clone()),
                KEY_MINIDUMP_SHA256 => {
                    minidump_sha256_hash = value.as_str().map(str::to_string)
                }
                "RemoteType" => {
                    metadata.insert(key.clone(), scrub_remote_type(value));
                }
                key if PING_METADATA_ALLOWLIST.contains(&key) => {
                    metadata.insert(key.to_string(), value.clone());
                }
                _ => {}
            }
        }

        Some(CrashPing {
            crash_id: record.id.clone(),
            process_type: crash_type.process.as_str().to_string(),
            crash_time: truncate_to_minute(crash_date),
            has_crash_environment: environment.is_some(),
            environment,
            metadata,
            stack_traces,
            minidump_sha256_hash,
            session_id,
        })
    }

    /// Whether `StartupCrash` marks this as a crash during startup.
    pub fn startup_crash(&self) -> bool {
        self.metadata.get("StartupCrash").and_then(Value::as_str) == Some("1")
    }

    /// Process uptime at crash time in milliseconds, from `UptimeTS` seconds.
    pub fn uptime_ms(&self) -> Option<f64> {
        self.metadata
            .get("UptimeTS")
            .and_then(value_as_f64)
            .map(|seconds| seconds * 1000.0)
    }
}

/// Zero out seconds and sub-seconds.
pub fn truncate_to_minute(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(date)
}

/// The environment arrives as a JSON string inside the metadata; anything
/// unparsable counts as no environment.
fn parse_environment(crash_id: &str, value: &Value) -> Option<Value> {
    let raw = match value.as_str() {
        Some(raw) => raw,
        None => {
            warn!(crash_id = %crash_id, "Crash environment is not a string, dropping it");
            return None;
        }
    };
    match serde_json::from_str(raw) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(crash_id = %crash_id, error = %err, "Failed to parse crash environment");
            None
        }
    }
}

/// Strip the origin suffix from `RemoteType` values like
/// `webIsolated=https://example.com`.
fn scrub_remote_type(value: &Value) -> Value {
    match value.as_str() {
        Some(raw) => Value::String(raw.split('=').next().unwrap_or(raw).to_string()),
        None => value.clone(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.parse().ok(),
        _ => None,
    }
}

/// A crash ping delivery mechanism. Implementations must not assume they are
/// the only sink; the manager fans one payload out to all of them.
#[async_trait]
pub trait PingSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, ping: &CrashPing) -> Result<(), PingError>;
}

/// Legacy archived-ping delivery: one JSON document per crash, written
/// atomically into an archive directory.
pub struct ArchiveSink {
    dir: PathBuf,
}

impl ArchiveSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive path for a crash id.
    pub fn archive_path(&self, crash_id: &str) -> PathBuf {
        self.dir.join(format!("crash-{}.json", sanitize_id(crash_id)))
    }
}

#[async_trait]
impl PingSink for ArchiveSink {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn submit(&self, ping: &CrashPing) -> Result<(), PingError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let serialized = serde_json::to_vec_pretty(ping)?;

        let path = self.archive_path(&ping.crash_id);
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &serialized).await?;
        if let Err(err) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

/// Crash ids come from file contents, so they cannot be trusted as path
/// components as-is.
fn sanitize_id(crash_id: &str) -> String {
    crash_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A structured metric derived from one crash ping.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashMetric {
    pub process_type: String,
    pub time: DateTime<Utc>,
    pub startup: bool,
    pub uptime_ms: Option<f64>,
}

/// Modern structured-metrics delivery: in-process counters and per-ping
/// derived values, readable by the embedder.
#[derive(Default)]
pub struct MetricsSink {
    state: Mutex<MetricsState>,
}

#[derive(Default)]
struct MetricsState {
    counts: HashMap<String, u64>,
    metrics: Vec<CrashMetric>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pings recorded so far for a process type.
    pub fn count(&self, process_type: &str) -> u64 {
        self.state
            .lock()
            .counts
            .get(process_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> Vec<CrashMetric> {
        self.state.lock().metrics.clone()
    }
}

#[async_trait]
impl PingSink for MetricsSink {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn submit(&self, ping: &CrashPing) -> Result<(), PingError> {
        let metric = CrashMetric {
            process_type: ping.process_type.clone(),
            time: ping.crash_time,
            startup: ping.startup_crash(),
            uptime_ms: ping.uptime_ms(),
        };
        let mut state = self.state.lock();
        *state.counts.entry(ping.process_type.clone()).or_insert(0) += 1;
        state.metrics.push(metric);
        Ok(())
    }
}

/// Captures every ping in memory. Meant for tests and diagnostics.
#[derive(Default)]
pub struct MemorySink {
    pings: Mutex<Vec<CrashPing>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pings(&self) -> Vec<CrashPing> {
        self.pings.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.pings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.lock().is_empty()
    }
}

#[async_trait]
impl PingSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn submit(&self, ping: &CrashPing) -> Result<(), PingError> {
        self.pings.lock().push(ping.clone());
        Ok(())
    }
}
