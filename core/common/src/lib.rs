//! Common utilities and types shared across FieldSync modules.
//!
//! This module provides the error taxonomy, the inspection domain model and
//! the clock used to stamp modification times.

pub mod clock;
pub mod error;
pub mod model;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use model::{
    EntityKind, GeoPoint, Inspection, InspectionPatch, InspectionStatus, Operation,
    OutboxEntry, Readings, MAX_NOTES_LEN, MAX_PHOTOS,
};
pub use types::{LocalId, Timestamp};
