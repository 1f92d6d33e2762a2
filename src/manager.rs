//! The crash manager: a cloneable façade that coordinates event file
//! aggregation, the lazily-loaded store, submission tracking, ping delivery
//! and periodic maintenance.
//!
//! The store lives behind an async mutex as `Option<LiveStore>`: `None`
//! until first touched, loaded from its snapshot on demand, and unloaded
//! again by a per-load expiry task once it has sat idle past the configured
//! window. Aggregation is single-flight: concurrent callers share one
//! in-progress cycle instead of racing over the same files.

use crate::config::ManagerConfig;
use crate::error::ConfigError;
use crate::events::{parse_event, CrashEvent};
use crate::ping::{CrashPing, PingSink};
use crate::process::{CrashKind, ProcessType};
use crate::scanner::{self, DumpEntry};
use crate::store::{persistence, ApplyOutcome, CrashRecord, CrashStore, SubmissionStatus};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One in-progress aggregation cycle, shareable between concurrent callers.
type AggregationCycle = Shared<BoxFuture<'static, usize>>;

/// The loaded store plus its lifecycle bookkeeping.
struct LiveStore {
    store: CrashStore,
    /// When the expiry task may unload the store. Pushed forward on every
    /// access.
    deadline: Instant,
    /// Which load this is; stale expiry tasks recognize themselves by it.
    generation: u64,
    /// Snapshot on disk is behind the in-memory state.
    dirty: bool,
}

struct ManagerInner {
    config: ManagerConfig,
    store: AsyncMutex<Option<LiveStore>>,
    aggregation: SyncMutex<Option<AggregationCycle>>,
    waiters: SyncMutex<HashMap<String, Vec<oneshot::Sender<()>>>>,
    sinks: RwLock<Vec<Arc<dyn PingSink>>>,
    /// While non-zero the expiry task re-arms instead of unloading.
    protect: AtomicUsize,
    generation: AtomicU64,
}

/// Handle to the crash aggregation engine. Cloning is cheap and every clone
/// operates on the same underlying state.
#[derive(Clone)]
pub struct CrashManager {
    inner: Arc<ManagerInner>,
}

impl CrashManager {
    pub fn new(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        debug!(
            store_dir = %config.store_dir.display(),
            events_dirs = config.events_dirs.len(),
            "Creating crash manager"
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                store: AsyncMutex::new(None),
                aggregation: SyncMutex::new(None),
                waiters: SyncMutex::new(HashMap::new()),
                sinks: RwLock::new(Vec::new()),
                protect: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Register a delivery sink for crash pings. Every registered sink
    /// receives every subsequent ping.
    pub fn add_ping_sink(&self, sink: Arc<dyn PingSink>) {
        debug!(sink = sink.name(), "Registering crash ping sink");
        self.inner.sinks.write().push(sink);
    }

    /// Discover, apply and delete crash event files from all configured
    /// events directories. Returns the number of files consumed, malformed
    /// and unknown ones included. Concurrent calls join the in-progress
    /// cycle and observe its count.
    pub async fn aggregate_events_files(&self) -> usize {
        let cycle = {
            let mut slot = self.inner.aggregation.lock();
            match slot.as_ref() {
                Some(cycle) => cycle.clone(),
                None => {
                    let manager = self.clone();
                    let cycle = async move {
                        let processed = manager.aggregation_cycle().await;
                        *manager.inner.aggregation.lock() = None;
                        processed
                    }
                    .boxed()
                    .shared();
                    *slot = Some(cycle.clone());
                    // Detached driver, so the cycle finishes even when every
                    // caller is cancelled mid-await.
                    tokio::spawn({
                        let cycle = cycle.clone();
                        async move {
                            cycle.await;
                        }
                    });
                    cycle
                }
            }
        };
        cycle.await
    }

    /// All crash records currently known, in insertion order.
    pub async fn get_crashes(&self) -> Vec<CrashRecord> {
        self.with_store(|store| store.all().to_vec()).await
    }

    pub async fn get_crash(&self, crash_id: &str) -> Option<CrashRecord> {
        self.with_store(|store| store.get(crash_id).cloned()).await
    }

    pub async fn crashes_count(&self) -> usize {
        self.with_store(|store| store.len()).await
    }

    /// Record a crash programmatically. Returns false without touching the
    /// store when the process label is not a recognized type.
    pub async fn add_crash(
        &self,
        process_label: &str,
        kind: CrashKind,
        crash_id: &str,
        date: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> bool {
        let process = match ProcessType::from_label(process_label) {
            Some(process) => process,
            None => {
                warn!(
                    process = %process_label,
                    crash_id = %crash_id,
                    "Rejecting crash with unrecognized process type"
                );
                return false;
            }
        };
        self.mutate_record(crash_id, |store| {
            store.add_crash(process, kind, crash_id, date, metadata)
        })
        .await;
        true
    }

    /// Record that a submission of `crash_id` was started.
    pub async fn add_submission_attempt(
        &self,
        crash_id: &str,
        submission_id: &str,
        date: DateTime<Utc>,
    ) {
        self.mutate_record(crash_id, |store| {
            store.add_submission_attempt(crash_id, submission_id, date)
        })
        .await;
    }

    /// Record the outcome of a submission started earlier.
    pub async fn add_submission_result(
        &self,
        crash_id: &str,
        submission_id: &str,
        date: DateTime<Utc>,
        result: SubmissionStatus,
    ) {
        self.mutate_record(crash_id, |store| {
            store.add_submission_result(crash_id, submission_id, date, result)
        })
        .await;
    }

    /// Attach the server-assigned remote id to a crash.
    pub async fn set_remote_crash_id(&self, crash_id: &str, remote_id: &str) {
        self.mutate_record(crash_id, |store| store.set_remote_id(crash_id, remote_id))
            .await;
    }

    /// Replace the classification labels on a crash.
    pub async fn set_crash_classifications(&self, crash_id: &str, classifications: Vec<String>) {
        self.mutate_record(crash_id, |store| {
            store.set_classifications(crash_id, classifications)
        })
        .await;
    }

    /// Wait until a record for `crash_id` exists, through any creation path.
    /// Returns immediately when it is already present.
    pub async fn ensure_crash_is_present(&self, crash_id: &str) {
        let waiter = {
            let mut slot = self.inner.store.lock().await;
            let live = self.loaded_store(&mut slot).await;
            live.deadline = self.next_deadline();
            if live.store.contains(crash_id) {
                return;
            }
            let (sender, receiver) = oneshot::channel();
            self.inner
                .waiters
                .lock()
                .entry(crash_id.to_string())
                .or_default()
                .push(sender);
            receiver
        };
        debug!(crash_id = %crash_id, "Waiting for crash record to appear");
        let _ = waiter.await;
    }

    /// Minidumps waiting for submission, newest first.
    pub async fn pending_dumps(&self) -> Vec<DumpEntry> {
        scanner::pending_dump_entries(&self.inner.config.pending_dumps_dir).await
    }

    /// Receipts of already-submitted dumps, newest first.
    pub async fn submitted_dumps(&self) -> Vec<DumpEntry> {
        scanner::submitted_dump_entries(&self.inner.config.submitted_dumps_dir).await
    }

    /// Drop records whose newest activity predates `before`. Returns how
    /// many were removed.
    pub async fn prune_old_crashes(&self, before: DateTime<Utc>) -> usize {
        let mut slot = self.inner.store.lock().await;
        let live = self.loaded_store(&mut slot).await;
        live.deadline = self.next_deadline();

        let removed = live.store.prune(before);
        if removed > 0 {
            live.dirty = true;
            info!(removed, cutoff = %before, "Pruned old crash records");
            match persistence::save(&live.store, &self.inner.config.store_dir).await {
                Ok(()) => live.dirty = false,
                Err(err) => warn!(error = %err, "Failed to save crash store after prune"),
            }
        }
        removed
    }

    /// One maintenance pass: aggregate whatever is on disk, then prune
    /// records older than the configured purge age.
    pub async fn run_maintenance(&self) {
        let processed = self.aggregate_events_files().await;
        let cutoff = Utc::now() - chrono::Duration::days(self.inner.config.purge_age_days);
        let removed = self.prune_old_crashes(cutoff).await;
        debug!(processed, removed, "Maintenance pass complete");
    }

    /// Run one maintenance pass after `delay`. Must be called within a
    /// Tokio runtime.
    pub fn schedule_maintenance(&self, delay: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.run_maintenance().await;
        })
    }

    /// Run maintenance passes every `interval` until the manager is dropped
    /// or the returned handle is aborted. Must be called within a Tokio
    /// runtime.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let manager = match inner.upgrade() {
                    Some(inner) => CrashManager { inner },
                    None => return,
                };
                manager.run_maintenance().await;
            }
        })
    }

    /// How many times the store has been loaded from its snapshot. A bump
    /// between two calls means it expired and was reloaded in between.
    pub fn store_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Whether the store is currently resident. Does not load it and does
    /// not push its expiry deadline forward.
    pub async fn store_loaded(&self) -> bool {
        self.inner.store.lock().await.is_some()
    }

    async fn with_store<T>(&self, read: impl FnOnce(&CrashStore) -> T) -> T {
        let mut slot = self.inner.store.lock().await;
        let live = self.loaded_store(&mut slot).await;
        live.deadline = self.next_deadline();
        read(&live.store)
    }

    /// Apply one store mutation, then handle its side effects: waiter
    /// wakeups, ping delivery and early snapshot flushes.
    async fn mutate_record<F>(&self, crash_id: &str, mutation: F) -> ApplyOutcome
    where
        F: FnOnce(&mut CrashStore) -> ApplyOutcome,
    {
        let (outcome, ping) = {
            let mut slot = self.inner.store.lock().await;
            let live = self.loaded_store(&mut slot).await;
            live.deadline = self.next_deadline();

            let outcome = mutation(&mut live.store);
            live.dirty |= outcome.mutated;

            let ping = if outcome.ping_worthy {
                live.store.get(crash_id).and_then(CrashPing::from_record)
            } else {
                None
            };

            if outcome.flush_hint && live.dirty {
                match persistence::save(&live.store, &self.inner.config.store_dir).await {
                    Ok(()) => live.dirty = false,
                    Err(err) => warn!(error = %err, "Failed to flush crash store"),
                }
            }

            (outcome, ping)
        };

        if outcome.crash_created {
            self.notify_waiters(crash_id);
        }
        if let Some(ping) = ping {
            self.dispatch_ping(&ping).await;
        }
        outcome
    }

    /// The body of one aggregation cycle. Holds the store lock while files
    /// are applied so records, waiters and pings stay consistent.
    async fn aggregation_cycle(&self) -> usize {
        let entries = scanner::unprocessed_event_files(&self.inner.config.events_dirs).await;
        if entries.is_empty() {
            debug!("No crash event files found");
            return 0;
        }

        self.inner.protect.fetch_add(1, Ordering::SeqCst);

        let mut processed = 0usize;
        let mut created = Vec::new();
        let mut pings = Vec::new();
        {
            let mut slot = self.inner.store.lock().await;
            let live = self.loaded_store(&mut slot).await;
            live.deadline = self.next_deadline();

            for entry in &entries {
                match tokio::fs::read(&entry.path).await {
                    Ok(body) => match parse_event(&entry.name, entry.date, &body) {
                        Ok(CrashEvent::Unknown { kind }) => {
                            warn!(
                                file = %entry.path.display(),
                                kind = %kind,
                                "Removing crash event file of unknown type"
                            );
                        }
                        Ok(event) => {
                            let crash_id = event.crash_id().map(str::to_string);
                            let outcome = live.store.apply_event(&event);
                            live.dirty |= outcome.mutated;
                            if let Some(crash_id) = crash_id {
                                if outcome.crash_created {
                                    created.push(crash_id.clone());
                                }
                                if outcome.ping_worthy {
                                    pings.extend(
                                        live.store.get(&crash_id).and_then(CrashPing::from_record),
                                    );
                                }
                            }
                        }
                        Err(err) => {
                            warn!(
                                file = %entry.path.display(),
                                error = %err,
                                "Removing malformed crash event file"
                            );
                        }
                    },
                    Err(err) => {
                        warn!(
                            file = %entry.path.display(),
                            error = %err,
                            "Failed to read crash event file"
                        );
                    }
                }

                // Consumed either way; a file that failed to parse would
                // fail again on every later cycle.
                if let Err(err) = tokio::fs::remove_file(&entry.path).await {
                    warn!(
                        file = %entry.path.display(),
                        error = %err,
                        "Failed to delete crash event file"
                    );
                }
                processed += 1;
            }

            if live.dirty {
                match persistence::save(&live.store, &self.inner.config.store_dir).await {
                    Ok(()) => live.dirty = false,
                    Err(err) => warn!(error = %err, "Failed to save crash store"),
                }
            }
        }

        self.inner.protect.fetch_sub(1, Ordering::SeqCst);

        for crash_id in &created {
            self.notify_waiters(crash_id);
        }
        for ping in &pings {
            self.dispatch_ping(ping).await;
        }

        info!(processed, new_crashes = created.len(), "Aggregated crash event files");
        processed
    }

    /// Load the store into the slot if needed; spawns the expiry task for
    /// a fresh load. Callers refresh the deadline themselves.
    async fn loaded_store<'a>(&self, slot: &'a mut Option<LiveStore>) -> &'a mut LiveStore {
        let live = match slot.take() {
            Some(live) => live,
            None => {
                let store = persistence::load(&self.inner.config.store_dir).await;
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    generation,
                    crashes = store.len(),
                    "Crash store loaded from snapshot"
                );
                spawn_store_expiry(Arc::downgrade(&self.inner), generation);
                LiveStore {
                    store,
                    deadline: self.next_deadline(),
                    generation,
                    dirty: false,
                }
            }
        };
        slot.insert(live)
    }

    fn next_deadline(&self) -> Instant {
        Instant::now() + self.inner.config.store_expiration
    }

    fn notify_waiters(&self, crash_id: &str) {
        let waiters = self.inner.waiters.lock().remove(crash_id);
        if let Some(waiters) = waiters {
            debug!(
                crash_id = %crash_id,
                waiters = waiters.len(),
                "Crash record now present"
            );
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    async fn dispatch_ping(&self, ping: &CrashPing) {
        let sinks: Vec<Arc<dyn PingSink>> = self.inner.sinks.read().clone();
        for sink in sinks {
            if let Err(err) = sink.submit(ping).await {
                warn!(
                    sink = sink.name(),
                    crash_id = %ping.crash_id,
                    error = %err,
                    "Crash ping delivery failed"
                );
            }
        }
        debug!(
            crash_id = %ping.crash_id,
            process = %ping.process_type,
            "Crash ping dispatched"
        );
    }
}

/// Unloads the store once its deadline passes, saving it first when dirty.
/// Exits quietly when its load generation is no longer the resident one.
fn spawn_store_expiry(inner: Weak<ManagerInner>, generation: u64) {
    tokio::spawn(async move {
        loop {
            let deadline = {
                let strong = match inner.upgrade() {
                    Some(strong) => strong,
                    None => return,
                };
                let slot = strong.store.lock().await;
                match slot.as_ref() {
                    Some(live) if live.generation == generation => live.deadline,
                    _ => return,
                }
            };

            tokio::time::sleep_until(deadline).await;

            let strong = match inner.upgrade() {
                Some(strong) => strong,
                None => return,
            };
            let mut slot = strong.store.lock().await;
            let expired = match slot.as_mut() {
                Some(live) if live.generation == generation => {
                    if live.deadline > Instant::now() {
                        // Accessed while we slept; wait for the new deadline.
                        false
                    } else if strong.protect.load(Ordering::SeqCst) > 0 {
                        live.deadline = Instant::now() + strong.config.store_expiration;
                        false
                    } else {
                        true
                    }
                }
                _ => return,
            };
            if !expired {
                continue;
            }

            if let Some(live) = slot.take() {
                if live.dirty {
                    if let Err(err) = persistence::save(&live.store, &strong.config.store_dir).await
                    {
                        warn!(error = %err, "Failed to save crash store before unload");
                    }
                }
                debug!(
                    generation,
                    crashes = live.store.len(),
                    "Crash store unloaded after idle period"
                );
            }
            return;
        }
    });
}

/// A fresh client-side submission id, unique per attempt.
pub fn generate_submission_id() -> String {
    format!("sub-{}", Uuid::new_v4())
}
