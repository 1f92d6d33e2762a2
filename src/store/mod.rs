//! In-memory deduplicated crash store.
//!
//! One `CrashRecord` per crash id, merged in place as events arrive in any
//! order. The store itself is synchronous and single-owner; the manager
//! serializes access, handles snapshot persistence and tears the store down
//! after idle periods (see `persistence` for the snapshot format).

pub mod persistence;

use crate::events::CrashEvent;
use crate::process::{CrashKind, CrashType, ProcessType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Soft ceiling on same-type records added within one UTC day. Crossing it
/// logs a warning and requests an early snapshot flush; it never drops or
/// caps records.
pub const HIGH_WATER_DAILY_THRESHOLD: u32 = 100;

/// State of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Ok,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Ok => "ok",
            SubmissionStatus::Failed => "failed",
        }
    }
}

/// One tracked submission of a crash report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub request_date: DateTime<Utc>,
    pub response_date: Option<DateTime<Utc>>,
    pub result: SubmissionStatus,
}

/// Insertion-ordered map from submission id to submission state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submissions {
    records: Vec<SubmissionRecord>,
}

impl Submissions {
    pub fn get(&self, id: &str) -> Option<&SubmissionRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SubmissionRecord> {
        self.records.iter()
    }

    fn get_or_insert(&mut self, id: &str, request_date: DateTime<Utc>) -> &mut SubmissionRecord {
        if let Some(position) = self.records.iter().position(|record| record.id == id) {
            return &mut self.records[position];
        }
        self.records.push(SubmissionRecord {
            id: id.to_string(),
            request_date,
            response_date: None,
            result: SubmissionStatus::Pending,
        });
        let last = self.records.len() - 1;
        &mut self.records[last]
    }
}

/// The merged state of one crash. A record created by a submission-only
/// event is a placeholder: `crash_type` and `crash_date` stay unset until a
/// genuine crash event or `add_crash` call fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub id: String,
    #[serde(default)]
    pub crash_type: Option<CrashType>,
    #[serde(default)]
    pub crash_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub classifications: Vec<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub submissions: Submissions,
}

impl CrashRecord {
    fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            crash_type: None,
            crash_date: None,
            metadata: Map::new(),
            classifications: Vec::new(),
            remote_id: None,
            submissions: Submissions::default(),
        }
    }

    /// The combined type tag, e.g. `main-crash`, if the record has one.
    pub fn type_label(&self) -> Option<String> {
        self.crash_type.map(|t| t.label())
    }

    pub fn process_type(&self) -> Option<ProcessType> {
        self.crash_type.map(|t| t.process)
    }

    pub fn is_of_type(&self, process: ProcessType, kind: CrashKind) -> bool {
        self.crash_type == Some(CrashType::new(process, kind))
    }

    /// The newest date any event touched this record with; used as the prune
    /// key. Placeholder records with no dates at all return `None`.
    pub fn newest_date(&self) -> Option<DateTime<Utc>> {
        let mut newest = self.crash_date;
        for submission in self.submissions.iter() {
            let candidate = submission.response_date.unwrap_or(submission.request_date);
            if newest.map_or(true, |current| candidate > current) {
                newest = Some(candidate);
            }
        }
        newest
    }
}

/// What a store application did, so the caller can schedule pings, resolve
/// waiters and decide whether a snapshot write is due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The store changed and a snapshot write is pending.
    pub mutated: bool,
    /// A record was newly inserted (genuine crash or placeholder).
    pub crash_created: bool,
    /// The application set a crash type where none existed; this is the
    /// once-per-new-crash ping trigger.
    pub ping_worthy: bool,
    /// A daily count crossed the high-water mark; flush early.
    pub flush_hint: bool,
}

/// In-memory store of crash records, deduplicated by crash id, with
/// per-day counts of added crashes.
#[derive(Debug, Default)]
pub struct CrashStore {
    records: Vec<CrashRecord>,
    index: HashMap<String, usize>,
    counts_by_day: BTreeMap<NaiveDate, HashMap<String, u32>>,
}

impl CrashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CrashRecord> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    /// All records in insertion order.
    pub fn all(&self) -> &[CrashRecord] {
        &self.records
    }

    /// Crashes of the given type added on `day` (UTC), counted per
    /// application, so repeated updates of one id count each time.
    pub fn day_count(&self, day: NaiveDate, type_label: &str) -> u32 {
        self.counts_by_day
            .get(&day)
            .and_then(|counts| counts.get(type_label))
            .copied()
            .unwrap_or(0)
    }

    /// Record a crash, creating or updating the record for `id`. Type and
    /// date are overwritten; metadata keys are merged in, never deleted.
    pub fn add_crash(
        &mut self,
        process: ProcessType,
        kind: CrashKind,
        id: &str,
        date: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> ApplyOutcome {
        let crash_type = CrashType::new(process, kind);
        let (position, created) = self.ensure_record(id);
        let record = &mut self.records[position];
        let had_type = record.crash_type.is_some();
        record.crash_type = Some(crash_type);
        record.crash_date = Some(date);
        for (key, value) in metadata {
            record.metadata.insert(key, value);
        }
        let flush_hint = self.note_crash_added(crash_type, date);
        ApplyOutcome {
            mutated: true,
            crash_created: created,
            ping_worthy: !had_type,
            flush_hint,
        }
    }

    /// Record that a submission was started. Creates the parent record as a
    /// placeholder when the submission arrives before the crash itself.
    pub fn add_submission_attempt(
        &mut self,
        crash_id: &str,
        submission_id: &str,
        date: DateTime<Utc>,
    ) -> ApplyOutcome {
        let (position, created) = self.ensure_record(crash_id);
        let submission = self.records[position]
            .submissions
            .get_or_insert(submission_id, date);
        submission.request_date = date;
        ApplyOutcome {
            mutated: true,
            crash_created: created,
            ping_worthy: false,
            flush_hint: false,
        }
    }

    /// Record the outcome of a submission. Without a prior attempt the
    /// submission record is created here with `request_date = date`.
    pub fn add_submission_result(
        &mut self,
        crash_id: &str,
        submission_id: &str,
        date: DateTime<Utc>,
        result: SubmissionStatus,
    ) -> ApplyOutcome {
        let (position, created) = self.ensure_record(crash_id);
        let submission = self.records[position]
            .submissions
            .get_or_insert(submission_id, date);
        submission.response_date = Some(date);
        submission.result = result;
        ApplyOutcome {
            mutated: true,
            crash_created: created,
            ping_worthy: false,
            flush_hint: false,
        }
    }

    /// Attach the server-assigned remote id for a submitted crash.
    pub fn set_remote_id(&mut self, crash_id: &str, remote_id: &str) -> ApplyOutcome {
        let (position, created) = self.ensure_record(crash_id);
        self.records[position].remote_id = Some(remote_id.to_string());
        ApplyOutcome {
            mutated: true,
            crash_created: created,
            ping_worthy: false,
            flush_hint: false,
        }
    }

    /// Replace the classification labels for a crash.
    pub fn set_classifications(
        &mut self,
        crash_id: &str,
        classifications: Vec<String>,
    ) -> ApplyOutcome {
        let (position, created) = self.ensure_record(crash_id);
        self.records[position].classifications = classifications;
        ApplyOutcome {
            mutated: true,
            crash_created: created,
            ping_worthy: false,
            flush_hint: false,
        }
    }

    /// Apply one parsed event. Unknown events leave the store untouched.
    pub fn apply_event(&mut self, event: &CrashEvent) -> ApplyOutcome {
        match event {
            CrashEvent::MainCrash { id, date, metadata } => self.add_crash(
                ProcessType::Main,
                CrashKind::Crash,
                id,
                *date,
                metadata.clone(),
            ),
            CrashEvent::SubmissionAttempt {
                crash_id,
                submission_id,
                date,
            } => self.add_submission_attempt(crash_id, submission_id, *date),
            CrashEvent::SubmissionResult {
                crash_id,
                submission_id,
                date,
                status,
                remote_id,
            } => {
                let outcome =
                    self.add_submission_result(crash_id, submission_id, *date, *status);
                if let (SubmissionStatus::Ok, Some(remote)) = (status, remote_id) {
                    // The record already exists by now, so only the remote id changes.
                    self.set_remote_id(crash_id, remote);
                }
                outcome
            }
            CrashEvent::Unknown { .. } => ApplyOutcome::default(),
        }
    }

    /// Remove records whose newest date is older than `before`, along with
    /// count buckets for days entirely before it. Records that never gained
    /// any date are placeholders with nothing left to wait for and are
    /// removed too. Returns the number of records dropped.
    pub fn prune(&mut self, before: DateTime<Utc>) -> usize {
        let initial = self.records.len();
        self.records.retain(|record| {
            record
                .newest_date()
                .map_or(false, |newest| newest >= before)
        });
        self.rebuild_index();

        let cutoff_day = before.date_naive();
        self.counts_by_day.retain(|day, _| *day >= cutoff_day);

        initial - self.records.len()
    }

    fn ensure_record(&mut self, id: &str) -> (usize, bool) {
        if let Some(&position) = self.index.get(id) {
            return (position, false);
        }
        let position = self.records.len();
        self.records.push(CrashRecord::placeholder(id));
        self.index.insert(id.to_string(), position);
        (position, true)
    }

    fn note_crash_added(&mut self, crash_type: CrashType, date: DateTime<Utc>) -> bool {
        let day = date.date_naive();
        let count = self
            .counts_by_day
            .entry(day)
            .or_default()
            .entry(crash_type.label())
            .or_insert(0);
        *count += 1;
        if *count == HIGH_WATER_DAILY_THRESHOLD + 1 {
            warn!(
                day = %day,
                crash_type = %crash_type,
                count = *count,
                "Daily crash volume crossed the high-water mark"
            );
            return true;
        }
        false
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, record) in self.records.iter().enumerate() {
            self.index.insert(record.id.clone(), position);
        }
    }

    fn from_parts(
        records: Vec<CrashRecord>,
        counts_by_day: BTreeMap<NaiveDate, HashMap<String, u32>>,
    ) -> Self {
        let mut store = Self {
            records,
            index: HashMap::new(),
            counts_by_day,
        };
        store.rebuild_index();
        store
    }
}
