//! UI-facing application layer for FieldSync.
//!
//! Wraps the record store and the sync engine behind a single service that
//! form screens and status widgets talk to.

pub mod forms;
pub mod service;

pub use forms::NewInspection;
pub use service::{InspectionService, SyncStatusView};
