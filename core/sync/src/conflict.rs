//! Conflict detection and resolution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fieldsync_common::{Inspection, Timestamp};

/// Which version of a record survives a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
}

/// Information about a resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub uuid: Uuid,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub resolution: Resolution,
}

impl ConflictInfo {
    /// Both sides carry the same modification time.
    pub fn is_tie(&self) -> bool {
        self.local_updated_at == self.remote_updated_at
    }
}

/// Last-write-wins resolver.
///
/// The remote version wins only when strictly newer; a tie keeps local so
/// re-pulling records this client just pushed never rewrites them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Create a last-write-wins resolver.
    pub fn new() -> Self {
        Self
    }

    /// Compare two copies of one record.
    pub fn resolve(&self, local: &Inspection, remote: &Inspection) -> ConflictInfo {
        let resolution = if remote.updated_at > local.updated_at {
            Resolution::TakeRemote
        } else {
            Resolution::KeepLocal
        };
        ConflictInfo {
            uuid: local.uuid,
            local_updated_at: local.updated_at,
            remote_updated_at: remote.updated_at,
            resolution,
        }
    }

    /// Whether the remote copy should replace the local one.
    pub fn prefers_remote(&self, local: &Inspection, remote: &Inspection) -> bool {
        self.resolve(local, remote).resolution == Resolution::TakeRemote
    }
}
