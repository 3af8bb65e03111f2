//! Remote endpoint abstraction for FieldSync.
//!
//! This crate provides a unified interface over the authoritative remote
//! copy of the inspection set, along with:
//! - In-memory endpoint with simulated latency and fault injection
//! - JSON-file endpoint whose state survives process restarts

pub mod authoritative;
pub mod endpoint;
pub mod file;
pub mod memory;

pub use authoritative::AuthoritativeSet;
pub use endpoint::{HealthReport, PushOutcome, PushRecord, RemoteEndpoint};
pub use file::FileRemote;
pub use memory::{MemoryRemote, SimulatedLatency};
