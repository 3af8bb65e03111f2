//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryConfig;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Outbox entries sent per push call.
    pub batch_size: usize,
    /// Consecutive failed cycles before a retry chain is abandoned.
    pub max_retries: u32,
    /// Backoff between retries.
    pub retry: RetryConfig,
    /// Period of the auto-sync timer.
    pub auto_sync_interval_secs: u64,
}

impl SyncConfig {
    /// Set the number of outbox entries pushed per request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set how many consecutive failures abandon the retry chain.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set backoff parameters.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the period between automatic syncs.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval_secs = interval.as_secs();
        self
    }

    /// Auto-sync period, never shorter than one second.
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_secs.max(1))
    }

    /// Batch size, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            retry: RetryConfig::default(),
            auto_sync_interval_secs: 30,
        }
    }
}
