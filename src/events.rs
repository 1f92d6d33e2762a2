//! Parsing of on-disk crash event files into typed events.
//!
//! An event file's name encodes its kind and version (`crash.main.3`,
//! `crash.submission.1`); the body always starts with the crash id on the
//! first line. Parsing never touches the filesystem: the caller supplies the
//! name, the file date and the raw bytes, and deletion of consumed files
//! stays with the caller.

use crate::error::EventParseError;
use crate::store::SubmissionStatus;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A parsed crash event, ready to be applied to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CrashEvent {
    /// A crash in the main process, with optional annotation metadata.
    MainCrash {
        id: String,
        date: DateTime<Utc>,
        metadata: Map<String, Value>,
    },
    /// A submission was started for a crash.
    SubmissionAttempt {
        crash_id: String,
        submission_id: String,
        date: DateTime<Utc>,
    },
    /// A submission finished, successfully or not.
    SubmissionResult {
        crash_id: String,
        submission_id: String,
        date: DateTime<Utc>,
        status: SubmissionStatus,
        remote_id: Option<String>,
    },
    /// A file whose kind this version does not understand.
    Unknown { kind: String },
}

impl CrashEvent {
    /// The crash id this event concerns, if it has one.
    pub fn crash_id(&self) -> Option<&str> {
        match self {
            CrashEvent::MainCrash { id, .. } => Some(id),
            CrashEvent::SubmissionAttempt { crash_id, .. } => Some(crash_id),
            CrashEvent::SubmissionResult { crash_id, .. } => Some(crash_id),
            CrashEvent::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventFamily {
    MainCrash,
    Submission,
    Unknown,
}

/// Classify a file name of the form `<kind>.<version>`. Unknown kinds and
/// non-numeric versions both land in `Unknown`.
fn classify(name: &str) -> EventFamily {
    let Some((family, version)) = name.rsplit_once('.') else {
        return EventFamily::Unknown;
    };
    if version.parse::<u32>().is_err() {
        return EventFamily::Unknown;
    }
    match family {
        "crash.main" => EventFamily::MainCrash,
        "crash.submission" => EventFamily::Submission,
        _ => EventFamily::Unknown,
    }
}

/// Parse one event file body. `date` is the file's modification time and
/// becomes the event date.
pub fn parse_event(
    name: &str,
    date: DateTime<Utc>,
    body: &[u8],
) -> Result<CrashEvent, EventParseError> {
    let family = classify(name);
    if family == EventFamily::Unknown {
        return Ok(CrashEvent::Unknown {
            kind: name.to_string(),
        });
    }

    let text = std::str::from_utf8(body).map_err(|_| EventParseError::NotUtf8)?;
    match family {
        EventFamily::MainCrash => parse_main_crash(text, date),
        EventFamily::Submission => parse_submission(text, date),
        EventFamily::Unknown => Ok(CrashEvent::Unknown {
            kind: name.to_string(),
        }),
    }
}

fn parse_main_crash(text: &str, date: DateTime<Utc>) -> Result<CrashEvent, EventParseError> {
    let (id, rest) = split_crash_id(text)?;
    let metadata = if rest.trim().is_empty() {
        Map::new()
    } else {
        // A second id line spills into this parse and is rejected here, so a
        // crash id can never silently span multiple lines.
        let value: Value = serde_json::from_str(rest).map_err(EventParseError::Metadata)?;
        match value {
            Value::Object(map) => map,
            _ => return Err(EventParseError::MetadataNotObject),
        }
    };
    Ok(CrashEvent::MainCrash {
        id: id.to_string(),
        date,
        metadata,
    })
}

fn parse_submission(text: &str, date: DateTime<Utc>) -> Result<CrashEvent, EventParseError> {
    let (id, rest) = split_crash_id(text)?;

    let mut lines: Vec<&str> = rest.split('\n').collect();
    // One trailing newline is writer convention, not data.
    if lines.last() == Some(&"") {
        lines.pop();
    }
    if lines.is_empty() {
        return Err(EventParseError::MissingSubmissionResult);
    }
    if lines.len() > 2 {
        return Err(EventParseError::TrailingLines);
    }

    let succeeded = match lines[0] {
        "true" => true,
        "false" => false,
        other => return Err(EventParseError::SubmissionResult(other.to_string())),
    };
    let remote_id = lines
        .get(1)
        .filter(|remote| succeeded && !remote.is_empty())
        .map(|remote| remote.to_string());

    Ok(CrashEvent::SubmissionResult {
        crash_id: id.to_string(),
        submission_id: crate::manager::generate_submission_id(),
        date,
        status: if succeeded {
            SubmissionStatus::Ok
        } else {
            SubmissionStatus::Failed
        },
        remote_id,
    })
}

/// Split the body into the first-line crash id and the remainder.
fn split_crash_id(text: &str) -> Result<(&str, &str), EventParseError> {
    let (id, rest) = match text.split_once('\n') {
        Some((id, rest)) => (id, rest),
        None => (text, ""),
    };
    if id.is_empty() {
        return Err(EventParseError::Empty);
    }
    Ok((id, rest))
}
