//! Error types for the crash-report aggregation engine.

use thiserror::Error;

/// Construction-time configuration errors. These are the only failures
/// surfaced synchronously to the embedder; everything downstream is logged
/// and self-healed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Event-file body parse failures. A failed file is deleted and counted but
/// produces no crash record.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Event file is empty")]
    Empty,

    #[error("Event file is not valid UTF-8")]
    NotUtf8,

    #[error("Crash metadata is not a JSON object: {0}")]
    Metadata(#[source] serde_json::Error),

    #[error("Crash metadata must be a JSON object")]
    MetadataNotObject,

    #[error("Submission result must be \"true\" or \"false\", got {0:?}")]
    SubmissionResult(String),

    #[error("Submission event is missing its result line")]
    MissingSubmissionResult,

    #[error("Submission event has trailing lines after the remote id")]
    TrailingLines,
}

/// Store snapshot persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Ping delivery errors, reported per sink and never propagated past the
/// dispatch loop.
#[derive(Debug, Error)]
pub enum PingError {
    #[error("Ping archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ping serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Ping sink rejected payload: {0}")]
    Rejected(String),
}
