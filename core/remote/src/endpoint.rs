//! Remote endpoint trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fieldsync_common::{Inspection, Operation, Result, Timestamp};

/// One outbox mutation as transmitted to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRecord {
    pub operation: Operation,
    /// Live record for create/update, tombstone snapshot for delete.
    pub record: Inspection,
}

impl PushRecord {
    pub fn new(operation: Operation, record: Inspection) -> Self {
        Self { operation, record }
    }
}

/// Per-item result of a push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    /// Items that changed the authoritative set.
    pub synced_count: usize,
    /// Uuids the remote now agrees with, including idempotent no-ops.
    pub confirmed: Vec<Uuid>,
    /// Authoritative copies that were strictly newer than the pushed item.
    pub superseded: Vec<Inspection>,
}

impl PushOutcome {
    pub fn is_confirmed(&self, uuid: &Uuid) -> bool {
        self.confirmed.contains(uuid)
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub timestamp: Timestamp,
}

/// The authoritative copy of the inspection set.
///
/// Conflicts are resolved last-write-wins on `updated_at`, keyed by uuid.
/// Implementations surface transport failures as `Error::Network` and
/// server-side failures as `Error::Remote`.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Get the endpoint name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Submit a batch of mutations.
    ///
    /// # Postconditions
    /// - Create/update is applied iff the uuid is absent or the pushed
    ///   record is strictly newer; an equal timestamp is confirmed unchanged
    /// - Delete removes the copy unless the copy is strictly newer
    /// - Re-pushing an accepted batch changes nothing
    ///
    /// # Errors
    /// - Network/remote failures; nothing is applied
    async fn push(&self, batch: Vec<PushRecord>) -> Result<PushOutcome>;

    /// Fetch records modified after `since`, or all records when `None`.
    async fn pull(&self, since: Option<Timestamp>) -> Result<Vec<Inspection>>;

    /// Probe reachability.
    async fn health_check(&self) -> Result<HealthReport>;
}
