//! Inspection service used by the UI layer.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use fieldsync_common::{
    Error, Inspection, InspectionPatch, InspectionStatus, LocalId, Result, Timestamp,
};
use fieldsync_remote::RemoteEndpoint;
use fieldsync_store::RecordStore;
use fieldsync_sync::{SyncEngine, SyncOutcome, SyncScheduler, SyncStatus};

use crate::forms::NewInspection;

/// Status fields shown by the sync indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub pending_count: usize,
    pub last_sync_time: Option<Timestamp>,
    pub is_syncing: bool,
    pub is_online: bool,
}

impl From<&SyncStatus> for SyncStatusView {
    fn from(status: &SyncStatus) -> Self {
        Self {
            pending_count: status.pending_count,
            last_sync_time: status.last_sync_time,
            is_syncing: status.is_syncing,
            is_online: status.is_online,
        }
    }
}

/// Facade over the record store and the sync engine.
pub struct InspectionService<R: RemoteEndpoint + ?Sized + 'static> {
    engine: SyncEngine<R>,
    scheduler: Mutex<Option<SyncScheduler>>,
}

impl<R: RemoteEndpoint + ?Sized + 'static> InspectionService<R> {
    /// Create a service over an engine. Auto-sync starts stopped.
    pub fn new(engine: SyncEngine<R>) -> Self {
        Self {
            engine,
            scheduler: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    fn store(&self) -> &Arc<RecordStore> {
        self.engine.store()
    }

    /// Keep the published pending count in step with a committed mutation.
    fn after_mutation(&self) {
        if let Err(e) = self.engine.refresh_status() {
            warn!("Failed to refresh sync status: {}", e);
        }
    }

    pub fn create_inspection(&self, form: NewInspection) -> Result<Inspection> {
        let now = self.store().clock().now();
        let record = form.into_inspection(now);
        let id = self.store().create(&record)?;
        self.after_mutation();
        info!("Created inspection {} for tag {}", id, record.tag_id);
        self.get_inspection(id)
    }

    pub fn update_inspection(&self, id: LocalId, patch: &InspectionPatch) -> Result<Inspection> {
        let updated = self.store().update(id, patch)?;
        self.after_mutation();
        Ok(updated)
    }

    pub fn delete_inspection(&self, id: LocalId) -> Result<()> {
        self.store().delete(id)?;
        self.after_mutation();
        info!("Deleted inspection {}", id);
        Ok(())
    }

    /// All inspections, or only those with `status`.
    pub fn list_inspections(&self, status: Option<InspectionStatus>) -> Result<Vec<Inspection>> {
        match status {
            Some(status) => self.store().list_by_status(status),
            None => self.store().list_all(),
        }
    }

    /// Get one inspection, or `NotFound`.
    pub fn get_inspection(&self, id: LocalId) -> Result<Inspection> {
        self.store()
            .get_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("Inspection {} not found", id)))
    }

    /// Snapshot for the sync indicator.
    pub fn get_sync_status(&self) -> SyncStatusView {
        SyncStatusView::from(&self.engine.status())
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe()
    }

    /// Sync now, cancelling any backoff in progress.
    pub async fn trigger_manual_sync(&self) -> SyncOutcome {
        self.engine.force_sync().await
    }

    /// Start background auto-sync. No-op if already running.
    pub async fn start_auto_sync(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.is_none() {
            *scheduler = Some(SyncScheduler::spawn(self.engine.clone()));
        }
    }

    /// Stop background auto-sync and wait for it to exit.
    pub async fn stop_auto_sync(&self) {
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await;
        }
    }

    pub async fn is_auto_syncing(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }
}
