//! Published sync status and cycle outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use fieldsync_common::{Error, Timestamp};

/// Snapshot of the engine state consumed by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending_count: usize,
    pub last_sync_time: Option<Timestamp>,
    pub is_syncing: bool,
    pub is_online: bool,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// Why a sync request did not run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => f.write_str("sync already in progress"),
            SkipReason::Offline => f.write_str("offline"),
        }
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items the remote applied.
    pub pushed: usize,
    /// Outbox entries removed after confirmation.
    pub acknowledged: usize,
    /// Confirmed entries left pending because they were replaced mid-push.
    pub requeued: usize,
    /// Pushed items rejected in favour of a newer remote copy.
    pub superseded: usize,
    /// Entries dropped because their payload was missing.
    pub discarded: usize,
    /// Records received from the pull.
    pub pulled: usize,
    pub inserted: usize,
    pub updated: usize,
    pub conflicts_skipped: usize,
    pub duration: Duration,
}

/// Result of a sync request. Failures are reported here, never as `Err`.
#[derive(Debug)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
    Failed {
        error: Error,
        /// Delay of the scheduled retry, `None` once the chain is abandoned.
        retry_in: Option<Duration>,
    },
}

impl SyncOutcome {
    /// Whether the cycle ran to completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    /// Report of a completed cycle.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            SyncOutcome::Completed(report) => write!(
                f,
                "completed: {} pushed, {} pulled, {} conflicts kept local",
                report.pushed, report.pulled, report.conflicts_skipped
            ),
            SyncOutcome::Failed {
                error,
                retry_in: Some(delay),
            } => write!(f, "failed: {} (retrying in {:?})", error, delay),
            SyncOutcome::Failed {
                error,
                retry_in: None,
            } => write!(f, "failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let status = SyncStatus {
            pending_count: 2,
            is_online: true,
            ..SyncStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pendingCount"], 2);
        assert_eq!(json["isOnline"], true);
        assert_eq!(json["isSyncing"], false);
    }

    #[test]
    fn test_outcome_display() {
        let outcome = SyncOutcome::Failed {
            error: Error::Network("timeout".into()),
            retry_in: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            outcome.to_string(),
            "failed: Network error: timeout (retrying in 2s)"
        );
        assert_eq!(
            SyncOutcome::Skipped(SkipReason::Offline).to_string(),
            "skipped (offline)"
        );
        assert!(!outcome.is_completed());
    }
}
