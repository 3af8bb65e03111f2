//! Auto-sync scheduling: timer, explicit triggers and reconnects.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use fieldsync_common::{Error, Result};
use fieldsync_remote::RemoteEndpoint;

use crate::engine::SyncEngine;
use crate::status::SyncOutcome;

/// Requests accepted by the scheduler task.
#[derive(Debug)]
enum SyncRequest {
    /// Run a cycle now and report its outcome.
    Sync(oneshot::Sender<SyncOutcome>),
    /// Stop the scheduler.
    Shutdown,
}

/// Background auto-sync task.
///
/// Runs an initial cycle on start, then one per interval, one per
/// [`SyncScheduler::request_sync`] and one on every offline to online
/// transition. Every trigger goes through [`SyncEngine::sync`].
pub struct SyncScheduler {
    request_tx: mpsc::Sender<SyncRequest>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler using the engine's configured interval.
    pub fn spawn<R: RemoteEndpoint + ?Sized + 'static>(engine: SyncEngine<R>) -> Self {
        let period = engine.config().auto_sync_interval();
        Self::spawn_with_interval(engine, period)
    }

    pub fn spawn_with_interval<R: RemoteEndpoint + ?Sized + 'static>(
        engine: SyncEngine<R>,
        period: Duration,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(16);
        let task = tokio::spawn(run(engine, period, request_rx));
        Self { request_tx, task }
    }

    /// Trigger a cycle and wait for its outcome.
    pub async fn request_sync(&self) -> Result<SyncOutcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(SyncRequest::Sync(response_tx))
            .await
            .map_err(|_| Error::Sync("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Sync("Failed to receive sync result".to_string()))
    }

    /// Stop the scheduler and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.request_tx.send(SyncRequest::Shutdown).await;
        let _ = self.task.await;
    }
}

async fn run<R: RemoteEndpoint + ?Sized + 'static>(
    engine: SyncEngine<R>,
    period: Duration,
    mut request_rx: mpsc::Receiver<SyncRequest>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut online_rx = engine.connectivity().watch();
    let mut was_online = *online_rx.borrow_and_update();
    let mut watching = true;

    info!("Sync scheduler started (interval {:?})", period);
    log_outcome("Initial", &engine.sync().await);

    loop {
        tokio::select! {
            request = request_rx.recv() => match request {
                Some(SyncRequest::Sync(response_tx)) => {
                    debug!("Processing sync request");
                    let outcome = engine.sync().await;
                    log_outcome("Requested", &outcome);
                    let _ = response_tx.send(outcome);
                }
                Some(SyncRequest::Shutdown) | None => {
                    info!("Sync scheduler shutting down");
                    break;
                }
            },

            _ = ticker.tick() => {
                debug!("Triggering periodic sync");
                log_outcome("Periodic", &engine.sync().await);
            }

            changed = online_rx.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    info!("Back online, syncing");
                    log_outcome("Reconnect", &engine.sync().await);
                }
                was_online = online;
            }
        }
    }
}

fn log_outcome(trigger: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(_) => debug!("{} sync {}", trigger, outcome),
        _ => info!("{} sync {}", trigger, outcome),
    }
}
