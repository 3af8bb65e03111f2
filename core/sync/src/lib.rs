//! FieldSync Sync Engine
//!
//! This module reconciles the local record store with a remote endpoint:
//! - Push-then-pull cycles that drain the outbox in batches
//! - Last-write-wins conflict resolution
//! - Retry with exponential backoff after failed cycles
//! - Published status and connectivity subscription
//! - Background auto-sync scheduling

pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod retry;
pub mod scheduler;
pub mod status;

// Re-export main types
pub use config::SyncConfig;
pub use conflict::{ConflictInfo, ConflictResolver, Resolution};
pub use connectivity::{Connectivity, Subscription};
pub use engine::SyncEngine;
pub use retry::{RetryConfig, RetryDecision, RetryState};
pub use scheduler::SyncScheduler;
pub use status::{SkipReason, SyncOutcome, SyncReport, SyncStatus};
