//! In-memory remote endpoint for testing and demos.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use fieldsync_common::{Clock, Error, Inspection, Result, SystemClock, Timestamp};

use crate::authoritative::AuthoritativeSet;
use crate::endpoint::{HealthReport, PushOutcome, PushRecord, RemoteEndpoint};

/// Uniformly distributed artificial delay applied to every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedLatency {
    pub min: Duration,
    pub max: Duration,
}

impl SimulatedLatency {
    /// Uniform latency between `min` and `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Delay profile of a slow field network.
    pub fn field_network() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(1000))
    }

    fn sample(&self) -> Duration {
        let spread = self.max.saturating_sub(self.min);
        self.min + spread.mul_f64(rand::random::<f64>())
    }
}

#[derive(Debug, Default)]
struct Counters {
    push: AtomicUsize,
    pull: AtomicUsize,
    health: AtomicUsize,
}

/// In-process authoritative store.
///
/// Cloning shares the same state, so a test can keep a handle for
/// inspection and fault injection while the engine owns another.
#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<RwLock<AuthoritativeSet>>,
    latency: Option<SimulatedLatency>,
    reachable: Arc<AtomicBool>,
    failing_pushes: Arc<AtomicUsize>,
    failing_pulls: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl MemoryRemote {
    /// Create an empty, reachable endpoint with no latency.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AuthoritativeSet::new())),
            latency: None,
            reachable: Arc::new(AtomicBool::new(true)),
            failing_pushes: Arc::new(AtomicUsize::new(0)),
            failing_pulls: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Delay every call by a sampled latency.
    pub fn with_latency(mut self, latency: SimulatedLatency) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call fail with a network error while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `n` push calls.
    pub fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` pull calls.
    pub fn fail_next_pulls(&self, n: usize) {
        self.failing_pulls.store(n, Ordering::SeqCst);
    }

    /// Number of `push` calls received.
    pub fn push_calls(&self) -> usize {
        self.counters.push.load(Ordering::SeqCst)
    }

    /// Number of `pull` calls received.
    pub fn pull_calls(&self) -> usize {
        self.counters.pull.load(Ordering::SeqCst)
    }

    /// Number of `health_check` calls received.
    pub fn health_calls(&self) -> usize {
        self.counters.health.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.push_calls() + self.pull_calls() + self.health_calls()
    }

    /// Write a record directly, simulating an edit from another client.
    pub fn insert_external(&self, record: Inspection) -> Result<()> {
        self.write()?.put(record);
        Ok(())
    }

    /// Authoritative copy of a record, bypassing latency and faults.
    pub fn get(&self, uuid: &Uuid) -> Result<Option<Inspection>> {
        Ok(self.read()?.get(uuid).cloned())
    }

    /// All authoritative records.
    pub fn records(&self) -> Result<Vec<Inspection>> {
        Ok(self.read()?.records())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AuthoritativeSet>> {
        self.state
            .read()
            .map_err(|_| Error::Remote("Remote state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AuthoritativeSet>> {
        self.state
            .write()
            .map_err(|_| Error::Remote("Remote state lock poisoned".to_string()))
    }

    async fn simulate_round_trip(&self, injected: &AtomicUsize, call: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency.sample()).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Network("Remote endpoint unreachable".to_string()));
        }
        let injected_failure = injected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(Error::Network(format!("Injected {} failure", call)));
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteEndpoint for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, batch: Vec<PushRecord>) -> Result<PushOutcome> {
        self.counters.push.fetch_add(1, Ordering::SeqCst);
        self.simulate_round_trip(&self.failing_pushes, "push").await?;

        let size = batch.len();
        let outcome = self.write()?.apply(batch);
        debug!(
            "Memory remote accepted push of {} items ({} applied)",
            size, outcome.synced_count
        );
        Ok(outcome)
    }

    async fn pull(&self, since: Option<Timestamp>) -> Result<Vec<Inspection>> {
        self.counters.pull.fetch_add(1, Ordering::SeqCst);
        self.simulate_round_trip(&self.failing_pulls, "pull").await?;
        Ok(self.read()?.changed_since(since))
    }

    async fn health_check(&self) -> Result<HealthReport> {
        self.counters.health.fetch_add(1, Ordering::SeqCst);
        let none = AtomicUsize::new(0);
        self.simulate_round_trip(&none, "health check").await?;
        Ok(HealthReport {
            status: "ok".to_string(),
            timestamp: SystemClock.now(),
        })
    }
}
