//! Core sync engine that orchestrates push and pull cycles.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fieldsync_common::{Clock, Error, Inspection, Operation, OutboxEntry, Result, Timestamp};
use fieldsync_remote::{PushRecord, RemoteEndpoint};
use fieldsync_store::{MergeOutcome, RecordStore};

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::connectivity::{Connectivity, Subscription};
use crate::retry::{RetryDecision, RetryState};
use crate::status::{SkipReason, SyncOutcome, SyncReport, SyncStatus};

struct Inner<R: RemoteEndpoint + ?Sized> {
    store: Arc<RecordStore>,
    remote: Arc<R>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    resolver: ConflictResolver,
    /// Held for the whole of a cycle.
    cycle: tokio::sync::Mutex<()>,
    retry: Mutex<RetryState>,
    pending_retry: Mutex<Option<JoinHandle<()>>>,
    status: Arc<watch::Sender<SyncStatus>>,
    _online_subscription: Subscription,
}

/// Sync engine handle. Clones share one engine.
pub struct SyncEngine<R: RemoteEndpoint + ?Sized + 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteEndpoint + ?Sized + 'static> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<R: RemoteEndpoint + ?Sized + 'static> SyncEngine<R> {
    /// Create a sync engine over an existing store and endpoint.
    ///
    /// Times are taken from the store's clock so that modification and sync
    /// stamps agree.
    ///
    /// # Errors
    /// - Store read failure while computing the initial status
    pub fn new(
        store: Arc<RecordStore>,
        remote: Arc<R>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Result<Self> {
        let initial = SyncStatus {
            pending_count: store.count_pending()?,
            last_sync_time: store.last_sync_time()?,
            is_online: connectivity.is_online(),
            ..SyncStatus::default()
        };
        let (status, _) = watch::channel(initial);
        let status = Arc::new(status);

        let publisher = status.clone();
        let subscription = connectivity.on_change(move |online| {
            publisher.send_modify(|s| s.is_online = online);
        });

        info!(
            "Sync engine ready (remote: {}, batch size: {})",
            remote.name(),
            config.effective_batch_size()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                clock: store.clock(),
                store,
                remote,
                connectivity,
                config,
                resolver: ConflictResolver::new(),
                cycle: tokio::sync::Mutex::new(()),
                retry: Mutex::new(RetryState::new()),
                pending_retry: Mutex::new(None),
                status,
                _online_subscription: subscription,
            }),
        })
    }

    /// Record store this engine reconciles.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.inner.store
    }

    /// Remote endpoint this engine pushes to and pulls from.
    pub fn remote(&self) -> &Arc<R> {
        &self.inner.remote
    }

    /// Connectivity monitor gating each cycle.
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a retry is scheduled.
    pub fn has_pending_retry(&self) -> bool {
        locked(&self.inner.pending_retry).is_some()
    }

    /// Re-read pending count and last sync time into the published status.
    pub fn refresh_status(&self) -> Result<()> {
        let pending = self.inner.store.count_pending()?;
        let last_sync = self.inner.store.last_sync_time()?;
        self.inner.status.send_modify(|s| {
            s.pending_count = pending;
            s.last_sync_time = last_sync;
        });
        Ok(())
    }

    /// Run one cycle unless another is active or the device is offline.
    pub async fn sync(&self) -> SyncOutcome {
        let Ok(_guard) = self.inner.cycle.try_lock() else {
            debug!("Sync requested while a cycle is running, skipping");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        self.run_locked().await
    }

    /// Cancel any scheduled retry, reset the failure counter, wait for an
    /// active cycle to finish, then run a cycle.
    pub async fn force_sync(&self) -> SyncOutcome {
        self.cancel_pending_retry();
        locked(&self.inner.retry).reset();

        let _guard = self.inner.cycle.lock().await;
        // The cycle we waited for may have scheduled a retry.
        self.cancel_pending_retry();
        locked(&self.inner.retry).reset();

        info!("Forced sync");
        self.run_locked().await
    }

    fn cancel_pending_retry(&self) {
        if let Some(handle) = locked(&self.inner.pending_retry).take() {
            debug!("Cancelling scheduled retry");
            handle.abort();
        }
    }

    async fn run_locked(&self) -> SyncOutcome {
        if !self.inner.connectivity.is_online() {
            debug!("Offline, sync skipped");
            self.inner.status.send_modify(|s| s.is_online = false);
            return SyncOutcome::Skipped(SkipReason::Offline);
        }

        let cycle_start = self.inner.clock.now();
        let started = Instant::now();
        self.inner.status.send_modify(|s| {
            s.is_syncing = true;
            s.is_online = true;
        });
        info!("Starting sync cycle");

        match self.run_cycle(cycle_start).await {
            Ok(mut report) => {
                report.duration = started.elapsed();
                locked(&self.inner.retry).reset();
                info!(
                    "Sync completed in {:?}: {} pushed, {} acknowledged, {} pulled, {} conflicts kept local",
                    report.duration,
                    report.pushed,
                    report.acknowledged,
                    report.pulled,
                    report.conflicts_skipped
                );
                self.publish_idle(None, 0);
                SyncOutcome::Completed(report)
            }
            Err(error) => self.handle_failure(error),
        }
    }

    async fn run_cycle(&self, cycle_start: Timestamp) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.push_phase(&mut report).await?;
        self.pull_phase(&mut report).await?;
        self.inner.store.set_last_sync_time(cycle_start)?;
        Ok(report)
    }

    async fn push_phase(&self, report: &mut SyncReport) -> Result<()> {
        let entries = self.inner.store.outbox()?;
        if entries.is_empty() {
            debug!("Outbox empty, nothing to push");
            return Ok(());
        }
        info!("Pushing {} pending changes", entries.len());

        for batch in entries.chunks(self.inner.config.effective_batch_size()) {
            let mut items = Vec::with_capacity(batch.len());
            let mut sent = Vec::with_capacity(batch.len());
            for entry in batch {
                match self.payload_for(entry)? {
                    Some(record) => {
                        items.push(PushRecord::new(entry.operation, record.clone()));
                        sent.push((entry, record));
                    }
                    None => {
                        warn!(
                            "No payload for {} of {}, discarding entry",
                            entry.operation, entry.entity_id
                        );
                        if self.inner.store.discard(entry)? {
                            report.discarded += 1;
                        }
                    }
                }
            }
            if items.is_empty() {
                continue;
            }

            let outcome = self.inner.remote.push(items).await?;
            report.pushed += outcome.synced_count;

            let synced_at = self.inner.clock.now();
            for (entry, record) in sent {
                if !outcome.is_confirmed(&entry.entity_id) {
                    continue;
                }
                if self.inner.store.acknowledge(entry, &record, synced_at)? {
                    report.acknowledged += 1;
                } else {
                    report.requeued += 1;
                }
            }

            for newer in &outcome.superseded {
                debug!("Remote holds a newer {}, merging", newer.uuid);
                report.superseded += 1;
                self.merge(newer, report)?;
            }
        }
        Ok(())
    }

    /// Live record for create/update, tombstone snapshot for delete.
    fn payload_for(&self, entry: &OutboxEntry) -> Result<Option<Inspection>> {
        match entry.operation {
            Operation::Create | Operation::Update => {
                self.inner.store.get_by_uuid(&entry.entity_id)
            }
            Operation::Delete => Ok(entry.data.clone()),
        }
    }

    async fn pull_phase(&self, report: &mut SyncReport) -> Result<()> {
        let since = self.inner.store.last_sync_time()?;
        let records = self.inner.remote.pull(since).await?;
        debug!("Pulled {} remote changes since {:?}", records.len(), since);

        report.pulled += records.len();
        for record in &records {
            self.merge(record, report)?;
        }
        Ok(())
    }

    fn merge(&self, remote: &Inspection, report: &mut SyncReport) -> Result<()> {
        let resolver = self.inner.resolver;
        let mut conflict = None;
        let outcome = self
            .inner
            .store
            .merge_remote(remote, self.inner.clock.now(), |local, remote| {
                let info = resolver.resolve(local, remote);
                let take = info.resolution == Resolution::TakeRemote;
                conflict = Some(info);
                take
            })?;

        match outcome {
            MergeOutcome::Inserted(_) => report.inserted += 1,
            MergeOutcome::Updated(_) => report.updated += 1,
            MergeOutcome::ConflictSkipped => {
                report.conflicts_skipped += 1;
                if let Some(info) = conflict.filter(|c| !c.is_tie()) {
                    debug!(
                        "Kept local {} (local {}, remote {})",
                        info.uuid, info.local_updated_at, info.remote_updated_at
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_failure(&self, error: Error) -> SyncOutcome {
        let decision = locked(&self.inner.retry)
            .record_failure(self.inner.config.max_retries, &self.inner.config.retry);

        let (retry_in, failures) = match decision {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    "Sync attempt {} failed: {}. Retrying in {:?}",
                    attempt, error, delay
                );
                self.schedule_retry(delay);
                (Some(delay), attempt)
            }
            RetryDecision::GiveUp { attempts } => {
                error!("Sync failed after {} attempts, giving up: {}", attempts, error);
                (None, 0)
            }
        };

        self.publish_idle(Some(error.to_string()), failures);
        SyncOutcome::Failed { error, retry_in }
    }

    fn schedule_retry(&self, delay: Duration) {
        let mut pending = locked(&self.inner.pending_retry);
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before running so the next failure can schedule anew.
            locked(&engine.inner.pending_retry).take();
            // The failed cycle may still hold the lock; wait instead of skipping.
            let _guard = engine.inner.cycle.lock().await;
            engine.run_locked().await;
        });
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    fn publish_idle(&self, last_error: Option<String>, failures: u32) {
        let pending = self.inner.store.count_pending();
        let last_sync = self.inner.store.last_sync_time();
        if let Err(e) = &pending {
            warn!("Failed to refresh pending count: {}", e);
        }
        self.inner.status.send_modify(|s| {
            if let Ok(count) = pending {
                s.pending_count = count;
            }
            if let Ok(at) = last_sync {
                s.last_sync_time = at;
            }
            s.is_syncing = false;
            s.last_error = last_error;
            s.consecutive_failures = failures;
        });
    }
}
