//! Common types used throughout FieldSync.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point in time used for every record and outbox timestamp.
pub type Timestamp = DateTime<Utc>;

/// Local store handle for an inspection.
///
/// Assigned by the record store and unique within it. Never used as the
/// reconciliation key; that role belongs to the inspection uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(i64);

impl LocalId {
    /// Wrap a raw store row id.
    ///
    /// # Errors
    /// - Returns error if `id` is not positive
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidInput(format!(
                "Local id must be positive, got {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the raw row id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LocalId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let raw = s
            .trim()
            .parse::<i64>()
            .map_err(|_| crate::Error::InvalidInput(format!("Invalid local id: {}", s)))?;
        Self::new(raw)
    }
}

/// Truncate a timestamp to the microsecond precision the store persists.
pub fn normalize(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(6)
}

/// Encode a timestamp as microseconds since the Unix epoch.
pub fn to_micros(ts: Timestamp) -> i64 {
    ts.timestamp_micros()
}

/// Decode a timestamp stored as microseconds since the Unix epoch.
pub fn from_micros(micros: i64) -> crate::Result<Timestamp> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| crate::Error::Serialization(format!("Timestamp out of range: {}", micros)))
}
