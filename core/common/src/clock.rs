//! Clock abstraction for stamping modification and sync times.

use chrono::Duration;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::{from_micros, normalize, to_micros, Timestamp};

/// Source of the current time.
///
/// Every returned timestamp is truncated to microseconds, the precision the
/// store keeps, so that last-write-wins comparisons survive persistence.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        normalize(chrono::Utc::now())
    }
}

/// Manually driven clock for deterministic tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(to_micros(normalize(start))),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, ts: Timestamp) {
        self.micros.store(to_micros(normalize(ts)), Ordering::SeqCst);
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let step = delta.num_microseconds().unwrap_or(i64::MAX);
        self.micros.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let micros = self.micros.load(Ordering::SeqCst);
        // Only reachable through `advance` past year 262143.
        from_micros(micros).unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    }
}
