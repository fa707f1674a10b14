use crate::{
    config::DEFAULT_MAX_ATTEMPTS,
    connectivity::ConnectivitySource,
    database::ClientDatabase,
    events::EventDispatcher,
    remote::RemoteService,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasklist_core::{
    errors::{ClientError, SyncError},
    models::{SyncAction, SyncQueueEntry, TaskId},
    SyncResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDraining,
    Offline,
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries a delivery was started for.
    pub attempted: usize,
    pub synced: usize,
    /// Failed entries kept for a later pass.
    pub retried: usize,
    /// Failed entries dropped at the attempt ceiling.
    pub abandoned: usize,
    /// Entries held back because an earlier entry for the same task failed.
    pub deferred: usize,
    /// The pass stopped early because connectivity was lost.
    pub interrupted: bool,
    pub remaining_unsynced: u64,
    pub remaining_queued: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::Skipped(_) => None,
        }
    }
}

/// Clears the draining flag however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays the sync queue against the remote service.
pub struct SyncEngine {
    db: Arc<ClientDatabase>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<dyn ConnectivitySource>,
    events: Arc<EventDispatcher>,
    draining: AtomicBool,
    max_attempts: u32,
    request_timeout: Duration,
}

impl SyncEngine {
    pub fn new(
        db: Arc<ClientDatabase>,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn ConnectivitySource>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            db,
            remote,
            connectivity,
            events,
            draining: AtomicBool::new(false),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run one drain pass unless offline or a pass is already running.
    pub async fn trigger_sync(&self) -> SyncResult<DrainOutcome> {
        if !self.connectivity.is_online() {
            tracing::debug!("CLIENT: Offline, not draining the sync queue");
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("CLIENT: Drain already in progress, ignoring trigger");
            return Ok(DrainOutcome::Skipped(SkipReason::AlreadyDraining));
        }
        let _guard = DrainGuard(&self.draining);

        self.drain().await.map(DrainOutcome::Completed)
    }

    async fn drain(&self) -> SyncResult<DrainReport> {
        let entries = self.db.queue_entries().await?;
        let mut report = DrainReport::default();

        if entries.is_empty() {
            report.remaining_unsynced = self.db.count_unsynced().await?.max(0) as u64;
            return Ok(report);
        }

        tracing::info!("CLIENT: Draining {} queued entries", entries.len());
        self.events.emit_sync_started();

        // Tasks with a failed entry this pass; their later entries wait
        let mut held: HashSet<TaskId> = HashSet::new();

        for entry in entries {
            if !self.connectivity.is_online() {
                tracing::info!("CLIENT: Went offline, stopping drain");
                report.interrupted = true;
                break;
            }

            if held.contains(&entry.task_id) {
                report.deferred += 1;
                tracing::debug!(
                    "CLIENT: Holding {} of task {} (entry {}) behind an earlier failure",
                    entry.action,
                    entry.task_id,
                    entry.id
                );
                continue;
            }

            report.attempted += 1;
            match self.deliver(&entry).await {
                Ok(()) => {
                    self.db.complete_entry(&entry).await?;
                    report.synced += 1;
                    tracing::debug!(
                        "CLIENT: Synced {} of task {} (entry {})",
                        entry.action,
                        entry.task_id,
                        entry.id
                    );
                }
                Err(e) => {
                    if e.is_delivery_failure() {
                        tracing::warn!(
                            "CLIENT: Failed to sync {} of task {} (entry {}): {}",
                            entry.action,
                            entry.task_id,
                            entry.id,
                            e
                        );
                    } else {
                        tracing::error!(
                            "CLIENT: Cannot deliver {} of task {} (entry {}): {}",
                            entry.action,
                            entry.task_id,
                            entry.id,
                            e
                        );
                    }
                    self.events
                        .emit_sync_error(Some(entry.task_id), &e.to_string());
                    held.insert(entry.task_id);

                    if self.record_failure(&entry).await? {
                        report.abandoned += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        report.remaining_unsynced = self.db.count_unsynced().await?.max(0) as u64;
        report.remaining_queued = self.db.count_queue().await?.max(0) as u64;

        tracing::info!(
            "CLIENT: Drain finished: {} synced, {} retried, {} abandoned, {} deferred, {} unsynced",
            report.synced,
            report.retried,
            report.abandoned,
            report.deferred,
            report.remaining_unsynced
        );
        self.events
            .emit_sync_completed(report.synced as u64, report.remaining_unsynced);

        Ok(report)
    }

    /// Count a failure, dropping the entry at the ceiling. Returns whether it
    /// was dropped.
    async fn record_failure(&self, entry: &SyncQueueEntry) -> SyncResult<bool> {
        let attempts = match self.db.record_failure(entry.id).await? {
            Some(attempts) => attempts,
            None => return Ok(false),
        };

        if attempts < self.max_attempts {
            return Ok(false);
        }

        self.db.remove_entry(entry.id).await?;
        tracing::warn!(
            "CLIENT: Giving up on {} of task {} after {} attempts",
            entry.action,
            entry.task_id,
            attempts
        );
        self.events
            .emit_entry_abandoned(entry.task_id, entry.action, attempts);
        Ok(true)
    }

    async fn deliver(&self, entry: &SyncQueueEntry) -> SyncResult<()> {
        let call = async {
            match entry.action {
                SyncAction::Create | SyncAction::Update => match &entry.payload {
                    Some(task) => self.remote.upsert(task).await,
                    None => Err(SyncError::InvalidTask(format!(
                        "queued {} for task {} has no payload",
                        entry.action, entry.task_id
                    ))),
                },
                SyncAction::Delete => self.remote.delete(entry.task_id).await,
            }
        };

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.request_timeout).into()),
        }
    }

    /// Seed an empty store from the remote's task list. Returns how many tasks
    /// were stored; nothing happens when offline or when tasks already exist.
    pub async fn bootstrap_from_remote(&self) -> SyncResult<usize> {
        if !self.connectivity.is_online() {
            return Ok(0);
        }
        if self.db.count_tasks().await? > 0 {
            tracing::debug!("CLIENT: Local store not empty, skipping bootstrap");
            return Ok(0);
        }

        let tasks = match tokio::time::timeout(self.request_timeout, self.remote.fetch_all()).await
        {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout(self.request_timeout).into()),
        };

        let stored = self.db.seed_synced_tasks(&tasks).await?;
        tracing::info!("CLIENT: Bootstrapped {} tasks from remote", stored);
        Ok(stored)
    }
}
