//! Durable local storage for FieldSync.
//!
//! The record store keeps inspections and the outbox of pending mutations in
//! one SQLite database. Every mutation that touches both runs inside a single
//! transaction, so a record and its outbox entry always change together.

mod rows;
pub mod schema;
pub mod store;

pub use store::{MergeOutcome, RecordStore, Violation, ViolationKind};
