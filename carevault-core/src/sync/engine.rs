// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bidirectional sync engine.
//!
//! Replicates encrypted documents byte-for-byte against a
//! [`ReplicationEndpoint`]; the engine never decrypts. Two modes: a
//! bounded one-shot pass, and a live loop that retries transport failures
//! with exponential backoff forever until stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::endpoint::{PushStatus, RemoteDocument, ReplicationEndpoint, TransportError};
use crate::storage::{
    unix_now, ConflictRecord, RawDocument, RemoteApply, Revision, Storage, StorageError,
    SyncStateKind, SyncStatus,
};

/// Stop-flag poll granularity while sleeping between passes.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Priority key for a pending document id; higher pushes first.
pub type PriorityFn = Box<dyn Fn(&str) -> u32 + Send>;

/// Readiness gate: `Err(reason)` withholds the document from push.
pub type ReadyFn = Box<dyn Fn(&str) -> Result<(), String> + Send>;

/// Invoked after a pull collision is recorded, e.g. to resolve it
/// immediately through the store.
pub type ConflictHandler = Box<dyn Fn(&ConflictRecord) + Send>;

/// Errors from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One-shot deadline exceeded. Live mode has no timeout by design.
    #[error("Sync pass exceeded its deadline")]
    Timeout,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Sync engine configuration.
pub struct SyncConfig {
    /// Deadline for a one-shot pass.
    pub timeout: Duration,
    /// Pause between live passes when everything is in sync.
    pub poll_interval: Duration,
    pub backoff: Backoff,
    pub priority: Option<PriorityFn>,
    pub ready: Option<ReadyFn>,
    pub on_conflict: Option<ConflictHandler>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
            backoff: Backoff::default(),
            priority: None,
            ready: None,
            on_conflict: None,
        }
    }
}

/// A document withheld from push, with the gate's reason.
#[derive(Debug, Clone)]
pub struct WithheldDocument {
    pub id: String,
    pub reason: String,
}

/// Partial-success report of a sync pass. Per-document errors never
/// collapse into a single failure hiding which records went through.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
    pub withheld: Vec<WithheldDocument>,
}

impl SyncReport {
    fn absorb(&mut self, other: SyncReport) {
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.conflicts += other.conflicts;
        self.errors.extend(other.errors);
        self.withheld.extend(other.withheld);
    }
}

/// Drives replication between local storage and a remote endpoint.
///
/// Owns its storage handle so the live loop can run on its own thread;
/// other components open their own connection to the same database.
pub struct SyncEngine<E: ReplicationEndpoint> {
    storage: Storage,
    endpoint: E,
    config: SyncConfig,
}

impl<E: ReplicationEndpoint> SyncEngine<E> {
    pub fn new(storage: Storage, endpoint: E, config: SyncConfig) -> Self {
        SyncEngine {
            storage,
            endpoint,
            config,
        }
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        Ok(self.storage.load_sync_status()?)
    }

    /// The storage handle this engine replicates.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }

    /// Pushes pending local documents, highest priority first.
    pub fn push_once(&mut self) -> Result<SyncReport, SyncError> {
        self.push_with_deadline(Instant::now() + self.config.timeout)
    }

    /// Pulls remote changes since the stored checkpoint.
    pub fn pull_once(&mut self) -> Result<SyncReport, SyncError> {
        self.pull_with_deadline(Instant::now() + self.config.timeout)
    }

    /// One bounded bidirectional pass: push, then pull.
    ///
    /// Updates the persisted sync status around the pass. Does not retry;
    /// the caller decides what a failure means.
    pub fn sync_once(&mut self) -> Result<SyncReport, SyncError> {
        let deadline = Instant::now() + self.config.timeout;

        let mut status = self.storage.load_sync_status()?;
        status.state = SyncStateKind::Syncing;
        self.storage.save_sync_status(&status)?;

        let result: Result<SyncReport, SyncError> = (|| {
            let mut report = self.push_with_deadline(deadline)?;
            report.absorb(self.pull_with_deadline(deadline)?);
            Ok(report)
        })();

        let mut status = self.storage.load_sync_status()?;
        match &result {
            Ok(report) => {
                status.state = SyncStateKind::Synced;
                status.last_success_at = Some(unix_now());
                status.last_error = None;
                status.next_retry_at = None;
                info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    "sync pass complete"
                );
            }
            Err(e) => {
                status.state = SyncStateKind::Error;
                status.last_error = Some(e.to_string());
            }
        }
        self.storage.save_sync_status(&status)?;

        result
    }

    fn push_with_deadline(&mut self, deadline: Instant) -> Result<SyncReport, SyncError> {
        if Instant::now() >= deadline {
            return Err(SyncError::Timeout);
        }

        let mut report = SyncReport::default();
        let mut outgoing = Vec::new();

        for document in self.storage.pending_push()? {
            if let Some(ready) = &self.config.ready {
                if let Err(reason) = ready(&document.id) {
                    debug!(document_id = %document.id, %reason, "withholding from push");
                    report.withheld.push(WithheldDocument {
                        id: document.id.clone(),
                        reason,
                    });
                    continue;
                }
            }
            outgoing.push(document);
        }

        if let Some(priority) = &self.config.priority {
            // Highest first, so a partial transfer has already sent the
            // most important records. Stable for equal priorities.
            outgoing.sort_by_key(|d| std::cmp::Reverse(priority(&d.id)));
        }

        if outgoing.is_empty() {
            return Ok(report);
        }

        let wire: Vec<RemoteDocument> = outgoing.iter().map(to_remote).collect();
        let outcomes = self.endpoint.push(&wire)?;

        for outcome in outcomes {
            match outcome.status {
                PushStatus::Accepted => {
                    let pushed = outgoing.iter().find(|d| d.id == outcome.id);
                    if let Some(document) = pushed {
                        self.storage.mark_pushed(&document.id, &document.revision)?;
                        report.pushed += 1;
                    }
                }
                PushStatus::Conflict => {
                    // Stays pending; the colliding revision arrives on pull
                    report
                        .errors
                        .push(format!("push conflict on {}", outcome.id));
                }
                PushStatus::Rejected(reason) => {
                    report
                        .errors
                        .push(format!("push of {} rejected: {}", outcome.id, reason));
                }
            }
        }

        Ok(report)
    }

    fn pull_with_deadline(&mut self, deadline: Instant) -> Result<SyncReport, SyncError> {
        if Instant::now() >= deadline {
            return Err(SyncError::Timeout);
        }

        let mut report = SyncReport::default();
        let checkpoint = self.storage.load_sync_status()?.pull_checkpoint;
        let batch = self.endpoint.pull_since(checkpoint)?;

        for remote in &batch.documents {
            match self.apply_pulled(remote) {
                Ok(Applied::Stored) => report.pulled += 1,
                Ok(Applied::Skipped) => {}
                Ok(Applied::Conflicted) => report.conflicts += 1,
                Err(e) => report.errors.push(format!("pull of {}: {}", remote.id, e)),
            }
        }

        // A failed document must be offered again on the next pull, so the
        // checkpoint only moves past batches that applied in full.
        if report.errors.is_empty() {
            let mut status = self.storage.load_sync_status()?;
            status.pull_checkpoint = batch.checkpoint;
            self.storage.save_sync_status(&status)?;
        }

        Ok(report)
    }

    fn apply_pulled(&self, remote: &RemoteDocument) -> Result<Applied, SyncError> {
        let revision = Revision::parse(&remote.revision)?;

        match self.storage.apply_remote_guarded(
            &remote.id,
            &revision,
            &remote.ciphertext,
            &remote.content_digest,
            remote.encrypted_at,
            remote.deleted,
        )? {
            RemoteApply::AlreadyCurrent => Ok(Applied::Skipped),
            RemoteApply::Conflicted(record) => {
                warn!(document_id = %remote.id, "pull collided with pending local edit");
                if let Some(handler) = &self.config.on_conflict {
                    if !record.resolved {
                        handler(&record);
                    }
                }
                Ok(Applied::Conflicted)
            }
            RemoteApply::Applied => Ok(Applied::Stored),
        }
    }

    /// Starts the live loop on a background thread.
    ///
    /// The loop syncs, sleeps, and repeats; transport failures back off
    /// exponentially and never abort it. [`LiveSyncHandle::stop`] cancels
    /// within a stop-flag poll interval and returns the engine.
    pub fn run_live(mut self) -> LiveSyncHandle<E>
    where
        E: 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = std::thread::spawn(move || {
            info!("live sync started");
            while !flag.load(Ordering::Relaxed) {
                match self.sync_once() {
                    Ok(_) => {
                        self.config.backoff.reset();
                        sleep_interruptible(self.config.poll_interval, &flag);
                    }
                    Err(SyncError::Transport(e)) => {
                        let delay = self.config.backoff.next_delay();
                        warn!(error = %e, delay_secs = delay.as_secs(), "transport error, backing off");

                        if let Ok(mut status) = self.storage.load_sync_status() {
                            status.state = SyncStateKind::Error;
                            status.next_retry_at = Some(unix_now() + delay.as_secs());
                            let _ = self.storage.save_sync_status(&status);
                        }
                        sleep_interruptible(delay, &flag);
                    }
                    Err(e) => {
                        warn!(error = %e, "sync pass failed");
                        sleep_interruptible(self.config.poll_interval, &flag);
                    }
                }
            }
            info!("live sync stopped");
            self
        });

        LiveSyncHandle { stop, thread }
    }
}

enum Applied {
    Stored,
    Skipped,
    Conflicted,
}

fn to_remote(document: &RawDocument) -> RemoteDocument {
    RemoteDocument {
        id: document.id.clone(),
        revision: document.revision.as_str().to_string(),
        ciphertext: document.ciphertext.clone(),
        content_digest: document.content_digest.clone(),
        encrypted_at: document.encrypted_at,
        deleted: document.deleted,
    }
}

/// Sleeps up to `duration`, waking early when the stop flag is set.
fn sleep_interruptible(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - Instant::now()));
    }
}

/// Handle to a running live sync loop.
pub struct LiveSyncHandle<E: ReplicationEndpoint + 'static> {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<SyncEngine<E>>,
}

impl<E: ReplicationEndpoint + 'static> LiveSyncHandle<E> {
    /// Signals the loop to stop and waits for it to finish, returning the
    /// engine for reuse or inspection.
    pub fn stop(self) -> SyncEngine<E> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.join().expect("live sync thread panicked")
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}
