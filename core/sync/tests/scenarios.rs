//! End-to-end sync scenarios against the in-memory remote.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use fieldsync_common::{
    Clock, Inspection, InspectionPatch, InspectionStatus, ManualClock, Operation, Result,
    Timestamp,
};
use fieldsync_remote::{
    HealthReport, MemoryRemote, PushOutcome, PushRecord, RemoteEndpoint, SimulatedLatency,
};
use fieldsync_store::RecordStore;
use fieldsync_sync::{Connectivity, SkipReason, SyncConfig, SyncEngine, SyncOutcome};

struct Harness {
    engine: SyncEngine<MemoryRemote>,
    store: Arc<RecordStore>,
    remote: MemoryRemote,
    clock: Arc<ManualClock>,
}

fn harness(remote: MemoryRemote, online: bool) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(RecordStore::in_memory_with_clock(clock.clone()).unwrap());
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(remote.clone()),
        Connectivity::new(online),
        SyncConfig::default(),
    )
    .unwrap();
    Harness {
        engine,
        store,
        remote,
        clock,
    }
}

fn draft(tag: &str) -> Inspection {
    Inspection::new(tag, format!("{} line", tag), "inspector")
}

#[tokio::test]
async fn test_created_record_syncs() {
    let h = harness(MemoryRemote::new(), true);
    let record = draft("U1");
    let id = h.store.create(&record).unwrap();
    assert_eq!(h.store.outbox().unwrap().len(), 1);

    let outcome = h.engine.sync().await;
    assert!(outcome.is_completed(), "unexpected outcome: {}", outcome);

    let stored = h.store.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, InspectionStatus::Synced);
    assert!(stored.synced_at.is_some());
    assert!(h.store.outbox().unwrap().is_empty());
    assert_eq!(h.remote.get(&record.uuid).unwrap().unwrap().tag_id, "U1");
}

#[tokio::test]
async fn test_offline_sync_makes_no_calls() {
    let h = harness(MemoryRemote::new(), false);
    let id = h.store.create(&draft("U2")).unwrap();

    let outcome = h.engine.sync().await;
    assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::Offline)));
    assert_eq!(h.remote.total_calls(), 0);
    assert_eq!(h.store.outbox().unwrap().len(), 1);
    assert_eq!(
        h.store.get_by_id(id).unwrap().unwrap().status,
        InspectionStatus::Draft
    );
    assert!(!h.engine.has_pending_retry());
    assert!(!h.engine.status().is_online);
}

/// Endpoint that acknowledges nothing and always serves a fixed pull set.
struct StaleRemote {
    records: Vec<Inspection>,
}

#[async_trait]
impl RemoteEndpoint for StaleRemote {
    fn name(&self) -> &str {
        "stale"
    }

    async fn push(&self, _batch: Vec<PushRecord>) -> Result<PushOutcome> {
        Ok(PushOutcome::default())
    }

    async fn pull(&self, _since: Option<Timestamp>) -> Result<Vec<Inspection>> {
        Ok(self.records.clone())
    }

    async fn health_check(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            status: "ok".to_string(),
            timestamp: Utc::now(),
        })
    }
}

#[tokio::test]
async fn test_newer_local_survives_older_remote() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    ));
    let store = Arc::new(RecordStore::in_memory_with_clock(clock).unwrap());
    let local = draft("U3").with_notes("local edit");
    let id = store.create(&local).unwrap();

    let remote_copy = local
        .clone()
        .with_notes("stale server copy")
        .with_status(InspectionStatus::Synced)
        .with_updated_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(StaleRemote {
            records: vec![remote_copy],
        }),
        Connectivity::new(true),
        SyncConfig::default(),
    )
    .unwrap();

    let report = engine.sync().await.report().cloned().unwrap();
    assert_eq!(report.conflicts_skipped, 1);
    assert_eq!(report.updated, 0);

    let stored = store.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.notes, "local edit");
    assert_eq!(stored.status, InspectionStatus::Draft);
    assert_eq!(store.count_pending().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_recovers_within_retry_cap() {
    let h = harness(MemoryRemote::new(), true);
    let id = h.store.create(&draft("U4")).unwrap();
    h.remote.fail_next_pushes(2);

    let first = h.engine.sync().await;
    assert!(matches!(
        first,
        SyncOutcome::Failed {
            retry_in: Some(d),
            ..
        } if d == Duration::from_secs(2)
    ));
    assert_eq!(h.engine.status().consecutive_failures, 1);

    // Second attempt runs after 2s and fails, the third after another 4s.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(h.remote.push_calls(), 2);
    assert_eq!(h.engine.status().consecutive_failures, 2);

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(h.remote.push_calls(), 3);

    let stored = h.store.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.status, InspectionStatus::Synced);
    assert!(h.store.outbox().unwrap().is_empty());

    let status = h.engine.status();
    assert!(!status.is_syncing);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
    assert!(!h.engine.has_pending_retry());
}

#[tokio::test(start_paused = true)]
async fn test_retry_chain_is_abandoned_at_cap() {
    let h = harness(MemoryRemote::new(), true);
    h.store.create(&draft("U5")).unwrap();
    h.remote.fail_next_pushes(10);

    h.engine.sync().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.remote.push_calls(), 3);
    assert!(!h.engine.has_pending_retry());
    assert_eq!(h.engine.status().consecutive_failures, 0);
    assert!(h.engine.status().last_error.is_some());
    assert_eq!(h.store.count_pending().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_cancels_retry() {
    let h = harness(MemoryRemote::new(), true);
    h.store.create(&draft("U6")).unwrap();
    h.remote.fail_next_pushes(1);

    assert!(matches!(h.engine.sync().await, SyncOutcome::Failed { .. }));
    assert!(h.engine.has_pending_retry());

    assert!(h.engine.force_sync().await.is_completed());
    assert!(!h.engine.has_pending_retry());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.push_calls(), 2);
    assert_eq!(h.engine.status().consecutive_failures, 0);
}

#[tokio::test]
async fn test_deleting_synced_record_sends_tombstone() {
    let h = harness(MemoryRemote::new(), true);
    let record = draft("U7");
    let id = h.store.create(&record).unwrap();
    assert!(h.engine.sync().await.is_completed());

    h.store.delete(id).unwrap();
    let outbox = h.store.outbox().unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].operation, Operation::Delete);
    assert!(outbox[0].data.is_some());

    let outcome = h.engine.sync().await;
    assert!(outcome.is_completed(), "unexpected outcome: {}", outcome);
    assert!(h.store.outbox().unwrap().is_empty());
    assert!(h.remote.get(&record.uuid).unwrap().is_none());
    assert!(h.store.get_by_uuid(&record.uuid).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_cycle_runs() {
    let remote = MemoryRemote::new().with_latency(SimulatedLatency::new(
        Duration::from_millis(200),
        Duration::from_millis(200),
    ));
    let h = harness(remote, true);
    h.store.create(&draft("U8")).unwrap();

    let (a, b) = futures::join!(h.engine.sync(), h.engine.sync());
    let outcomes = [a, b];
    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped(SkipReason::AlreadyRunning)))
        .count();
    assert_eq!((completed, skipped), (1, 1));
    assert_eq!(h.remote.push_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_waits_for_active_cycle() {
    let remote = MemoryRemote::new().with_latency(SimulatedLatency::new(
        Duration::from_millis(200),
        Duration::from_millis(200),
    ));
    let h = harness(remote, true);
    h.store.create(&draft("U9")).unwrap();

    let (first, forced) = futures::join!(h.engine.sync(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.engine.force_sync().await
    });

    assert!(first.is_completed());
    assert!(forced.is_completed());
    assert_eq!(h.remote.push_calls(), 1);
    assert_eq!(h.remote.pull_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_push_stays_pending() {
    let remote = MemoryRemote::new().with_latency(SimulatedLatency::new(
        Duration::from_millis(500),
        Duration::from_millis(500),
    ));
    let h = harness(remote, true);
    let id = h.store.create(&draft("U10")).unwrap();

    let (outcome, _) = futures::join!(h.engine.sync(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.clock.advance(ChronoDuration::minutes(1));
        h.store
            .update(id, &InspectionPatch {
                notes: Some("edited while pushing".into()),
                ..Default::default()
            })
            .unwrap();
    });

    let report = outcome.report().cloned().unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.acknowledged, 0);

    let stored = h.store.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.notes, "edited while pushing");
    assert!(stored.is_pending());
    let outbox = h.store.outbox().unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].operation, Operation::Update);
    assert!(h.store.verify().unwrap().is_empty());

    assert!(h.engine.sync().await.is_completed());
    let remote_copy = h.remote.get(&stored.uuid).unwrap().unwrap();
    assert_eq!(remote_copy.notes, "edited while pushing");
    assert_eq!(h.store.count_pending().unwrap(), 0);
}

#[tokio::test]
async fn test_delete_during_push_reaches_remote() {
    let remote = MemoryRemote::new().with_latency(SimulatedLatency::new(
        Duration::from_millis(500),
        Duration::from_millis(500),
    ));
    let h = harness(remote, true);
    let record = draft("U12");
    let id = h.store.create(&record).unwrap();

    let (outcome, _) = futures::join!(h.engine.sync(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.store.delete(id).unwrap();
    });

    let report = outcome.report().cloned().unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.acknowledged, 0);
    assert_eq!(report.inserted, 0);

    // The remote accepted the create, so the local delete is owed to it.
    assert!(h.store.get_by_uuid(&record.uuid).unwrap().is_none());
    let outbox = h.store.outbox().unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].operation, Operation::Delete);
    assert!(h.store.verify().unwrap().is_empty());

    assert!(h.engine.sync().await.is_completed());
    assert!(h.remote.get(&record.uuid).unwrap().is_none());
    assert!(h.store.get_by_uuid(&record.uuid).unwrap().is_none());
    assert_eq!(h.store.count_pending().unwrap(), 0);
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let h = harness(MemoryRemote::new(), true);
    h.store.create(&draft("U11")).unwrap();

    let first = h.engine.sync().await.report().cloned().unwrap();
    let snapshot = h.remote.records().unwrap();
    let second = h.engine.sync().await.report().cloned().unwrap();

    assert_eq!(first.pushed, 1);
    assert_eq!(second.pushed, 0);
    assert_eq!(h.remote.records().unwrap(), snapshot);
    assert_eq!(h.store.list_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_pull_adopts_remote_changes() {
    let h = harness(MemoryRemote::new(), true);
    let mine = draft("U12");
    let id = h.store.create(&mine).unwrap();
    assert!(h.engine.sync().await.is_completed());

    let newcomer = draft("U13").with_updated_at(h.clock.now() + ChronoDuration::hours(1));
    let edited = h
        .store
        .get_by_id(id)
        .unwrap()
        .unwrap()
        .with_notes("edited on tablet")
        .with_updated_at(h.clock.now() + ChronoDuration::hours(2));
    h.remote.insert_external(newcomer.clone()).unwrap();
    h.remote.insert_external(edited).unwrap();

    let report = h.engine.sync().await.report().cloned().unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);

    let stored = h.store.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.notes, "edited on tablet");
    assert_eq!(stored.local_id, Some(id));

    let adopted = h.store.get_by_uuid(&newcomer.uuid).unwrap().unwrap();
    assert_eq!(adopted.status, InspectionStatus::Synced);
    assert!(h.store.verify().unwrap().is_empty());
}
