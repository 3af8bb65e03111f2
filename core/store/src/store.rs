//! SQLite-backed record store with a transactional outbox.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fieldsync_common::types::{from_micros, normalize, to_micros};
use fieldsync_common::{
    Clock, Error, Inspection, InspectionPatch, InspectionStatus, LocalId, Operation, OutboxEntry,
    Result, SystemClock, Timestamp,
};

use crate::rows::{
    db_err, enqueue, find_by_id, find_by_uuid, find_entry, insert_inspection, read_inspection,
    read_outbox_entry, remove_entry_for, write_inspection, INSPECTION_COLUMNS, OUTBOX_COLUMNS,
};
use crate::schema::{migrate, LAST_SYNC_KEY};

/// Result of merging one remote record into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Record was unknown locally and has been inserted as synced.
    Inserted(LocalId),
    /// Local record was replaced by the remote version.
    Updated(LocalId),
    /// Local version kept; the remote delta was discarded.
    ConflictSkipped,
}

/// How a record and the outbox disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Unsynced record with no outbox entry.
    MissingEntry,
    /// Synced record that still has a create/update entry.
    SyncedWithEntry,
    /// Create/update entry without a record.
    OrphanEntry,
    /// Delete entry for a record that still exists.
    TombstoneForLiveRecord,
}

/// A record/outbox invariant violation found by [`RecordStore::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub uuid: Uuid,
    pub kind: ViolationKind,
}

/// Durable store for inspections and their outbox.
pub struct RecordStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    /// Create or open a store database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(db_path, Arc::new(SystemClock))
    }

    /// Open a store that stamps times from `clock`.
    pub fn open_with_clock(db_path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db_err)?;
        debug!("Journal mode: {}", mode);

        let store = Self::from_connection(conn, clock)?;
        info!("Record store opened at {}", db_path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Create an in-memory store driven by `clock`.
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        migrate(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// The clock this store stamps times with.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Store connection lock poisoned".to_string()))
    }

    /// Persist a new inspection.
    ///
    /// Stamps `updated_at` and, in the same transaction, queues a `create`
    /// outbox entry unless the record is already synced.
    ///
    /// # Errors
    /// - `InvalidInput` if the record fails validation
    /// - `Storage` on duplicate uuid or database failure
    pub fn create(&self, record: &Inspection) -> Result<LocalId> {
        record.validate()?;

        let now = self.clock.now();
        let mut stored = record.clone();
        stored.local_id = None;
        stored.updated_at = now;

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let local_id = insert_inspection(&tx, &stored)?;
        if stored.is_pending() {
            stored.local_id = Some(local_id);
            enqueue(&tx, &stored.uuid, Operation::Create, now, Some(&stored))?;
        }
        tx.commit().map_err(db_err)?;

        debug!("Created inspection {} ({})", stored.uuid, local_id);
        Ok(local_id)
    }

    /// Apply a patch to an inspection and re-derive its outbox entry.
    ///
    /// Editing a synced record without naming a status stamps it `complete`,
    /// since the edit is now owed to the remote.
    ///
    /// # Errors
    /// - `NotFound` if `local_id` is absent
    /// - `InvalidInput` if the patched record fails validation
    pub fn update(&self, local_id: LocalId, patch: &InspectionPatch) -> Result<Inspection> {
        let now = self.clock.now();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let mut record = find_by_id(&tx, local_id)?
            .ok_or_else(|| Error::NotFound(format!("Inspection {} not found", local_id)))?;
        let was_synced = !record.is_pending();

        patch.apply(&mut record);
        if was_synced && patch.status.is_none() {
            record.status = InspectionStatus::Complete;
        }
        record.validate()?;
        record.updated_at = now;

        write_inspection(&tx, local_id, &record)?;
        remove_entry_for(&tx, &record.uuid)?;
        if record.is_pending() {
            enqueue(&tx, &record.uuid, Operation::Update, now, Some(&record))?;
        }
        tx.commit().map_err(db_err)?;

        debug!("Updated inspection {} ({})", record.uuid, local_id);
        Ok(record)
    }

    /// Remove an inspection.
    ///
    /// A previously synced record leaves a `delete` tombstone carrying its
    /// snapshot. A never-synced record just loses its pending entry.
    ///
    /// # Errors
    /// - `NotFound` if `local_id` is absent
    pub fn delete(&self, local_id: LocalId) -> Result<()> {
        let now = self.clock.now();

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let record = find_by_id(&tx, local_id)?
            .ok_or_else(|| Error::NotFound(format!("Inspection {} not found", local_id)))?;

        remove_entry_for(&tx, &record.uuid)?;
        if !record.is_pending() {
            enqueue(&tx, &record.uuid, Operation::Delete, now, Some(&record))?;
        }
        tx.execute("DELETE FROM inspections WHERE id = ?1", [local_id.get()])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        debug!(
            "Deleted inspection {} ({}), tombstone queued: {}",
            record.uuid,
            local_id,
            !record.is_pending()
        );
        Ok(())
    }

    /// All inspections in insertion order.
    pub fn list_all(&self) -> Result<Vec<Inspection>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM inspections ORDER BY id", INSPECTION_COLUMNS);
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([], read_inspection).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Inspections with a given status, most recent first.
    pub fn list_by_status(&self, status: InspectionStatus) -> Result<Vec<Inspection>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM inspections WHERE status = ?1 ORDER BY timestamp DESC, id DESC",
            INSPECTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([status.as_str()], read_inspection)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Get an inspection by its local handle.
    pub fn get_by_id(&self, local_id: LocalId) -> Result<Option<Inspection>> {
        let conn = self.conn()?;
        find_by_id(&conn, local_id)
    }

    /// Get an inspection by uuid.
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Inspection>> {
        let conn = self.conn()?;
        find_by_uuid(&conn, uuid)
    }

    /// Number of live outbox entries.
    pub fn count_pending(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }

    /// All outbox entries in replay order.
    pub fn outbox(&self) -> Result<Vec<OutboxEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM outbox ORDER BY created_at, id",
            OUTBOX_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([], read_outbox_entry).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// The live outbox entry for an entity, if any.
    pub fn outbox_entry(&self, entity_id: &Uuid) -> Result<Option<OutboxEntry>> {
        let conn = self.conn()?;
        find_entry(&conn, entity_id)
    }

    /// Record the remote's acceptance of a pushed entry.
    ///
    /// Removes the entry only if it is still the live one. If the entity was
    /// mutated after the push was prepared, the replacement entry and the
    /// record stay pending. For create/update the record becomes synced.
    ///
    /// If the record was deleted locally while `pushed` was in flight, the
    /// remote now holds a copy nobody owes a delete for, so a tombstone
    /// carrying `pushed` is queued in its place.
    ///
    /// Returns whether the entry was acknowledged.
    pub fn acknowledge(
        &self,
        entry: &OutboxEntry,
        pushed: &Inspection,
        synced_at: Timestamp,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let removed = tx
            .execute("DELETE FROM outbox WHERE id = ?1", [entry.id])
            .map_err(db_err)?;
        if removed == 0 {
            let orphaned = entry.operation != Operation::Delete
                && find_by_uuid(&tx, &entry.entity_id)?.is_none()
                && find_entry(&tx, &entry.entity_id)?.is_none();
            if orphaned {
                enqueue(&tx, &entry.entity_id, Operation::Delete, now, Some(pushed))?;
                tx.commit().map_err(db_err)?;
                debug!(
                    "Inspection {} was deleted during its push, tombstone queued",
                    entry.entity_id
                );
            } else {
                debug!(
                    "Outbox entry {} for {} was superseded, leaving pending",
                    entry.id, entry.entity_id
                );
            }
            return Ok(false);
        }

        if entry.operation != Operation::Delete {
            tx.execute(
                "UPDATE inspections SET status = ?1, synced_at = ?2 WHERE uuid = ?3",
                params![
                    InspectionStatus::Synced.as_str(),
                    to_micros(synced_at),
                    entry.entity_id.to_string(),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Drop an entry that can no longer be replayed.
    pub fn discard(&self, entry: &OutboxEntry) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM outbox WHERE id = ?1", [entry.id])
            .map_err(db_err)?;
        if removed > 0 {
            warn!(
                "Discarded outbox entry {} ({} {})",
                entry.id, entry.operation, entry.entity_id
            );
        }
        Ok(removed > 0)
    }

    /// Merge an authoritative remote record.
    ///
    /// `take_remote(local, remote)` decides conflicts. For a record deleted
    /// locally with a pending tombstone, `local` is the tombstone snapshot.
    /// Adopting the remote version marks it synced and clears any outbox
    /// entry for the uuid. Remote timestamps are truncated to the stored
    /// precision before `take_remote` sees them.
    pub fn merge_remote<F>(
        &self,
        remote: &Inspection,
        synced_at: Timestamp,
        take_remote: F,
    ) -> Result<MergeOutcome>
    where
        F: FnOnce(&Inspection, &Inspection) -> bool,
    {
        let mut incoming = remote.clone();
        incoming.local_id = None;
        incoming.timestamp = normalize(remote.timestamp);
        incoming.updated_at = normalize(remote.updated_at);
        incoming.status = InspectionStatus::Synced;
        incoming.synced_at = Some(normalize(synced_at));

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let outcome = match find_by_uuid(&tx, &remote.uuid)? {
            Some(local) => {
                if !take_remote(&local, &incoming) {
                    return Ok(MergeOutcome::ConflictSkipped);
                }
                let local_id = local.local_id.ok_or_else(|| {
                    Error::Storage(format!("Inspection {} has no local id", local.uuid))
                })?;
                write_inspection(&tx, local_id, &incoming)?;
                remove_entry_for(&tx, &remote.uuid)?;
                MergeOutcome::Updated(local_id)
            }
            None => {
                if let Some(tombstone) = find_entry(&tx, &remote.uuid)? {
                    if let Some(snapshot) = &tombstone.data {
                        if !take_remote(snapshot, &incoming) {
                            return Ok(MergeOutcome::ConflictSkipped);
                        }
                    }
                    remove_entry_for(&tx, &remote.uuid)?;
                }
                MergeOutcome::Inserted(insert_inspection(&tx, &incoming)?)
            }
        };
        tx.commit().map_err(db_err)?;

        debug!("Merged remote inspection {}: {:?}", remote.uuid, outcome);
        Ok(outcome)
    }

    /// Time of the last fully successful sync cycle.
    pub fn last_sync_time(&self) -> Result<Option<Timestamp>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        value
            .map(|raw| {
                let micros = raw.parse::<i64>().map_err(|_| {
                    Error::Serialization(format!("Invalid last sync time: {}", raw))
                })?;
                from_micros(micros)
            })
            .transpose()
    }

    /// Persist the time of a fully successful sync cycle.
    pub fn set_last_sync_time(&self, at: Timestamp) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
            params![LAST_SYNC_KEY, to_micros(at).to_string()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Check the record/outbox invariant.
    ///
    /// An empty result means every unsynced record has exactly one entry and
    /// every synced record has none.
    pub fn verify(&self) -> Result<Vec<Violation>> {
        const CHECKS: [(ViolationKind, &str); 4] = [
            (
                ViolationKind::MissingEntry,
                "SELECT i.uuid FROM inspections i WHERE i.status != 'synced'
                 AND NOT EXISTS (SELECT 1 FROM outbox o WHERE o.entity_id = i.uuid
                                 AND o.operation != 'delete')",
            ),
            (
                ViolationKind::SyncedWithEntry,
                "SELECT i.uuid FROM inspections i WHERE i.status = 'synced'
                 AND EXISTS (SELECT 1 FROM outbox o WHERE o.entity_id = i.uuid
                             AND o.operation != 'delete')",
            ),
            (
                ViolationKind::OrphanEntry,
                "SELECT o.entity_id FROM outbox o WHERE o.operation != 'delete'
                 AND NOT EXISTS (SELECT 1 FROM inspections i WHERE i.uuid = o.entity_id)",
            ),
            (
                ViolationKind::TombstoneForLiveRecord,
                "SELECT o.entity_id FROM outbox o WHERE o.operation = 'delete'
                 AND EXISTS (SELECT 1 FROM inspections i WHERE i.uuid = o.entity_id)",
            ),
        ];

        let conn = self.conn()?;
        let mut violations = Vec::new();
        for (kind, sql) in CHECKS {
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let uuids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            for raw in uuids {
                let uuid = Uuid::parse_str(&raw)
                    .map_err(|e| Error::Serialization(format!("Invalid uuid {}: {}", raw, e)))?;
                violations.push(Violation { uuid, kind });
            }
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use fieldsync_common::{ManualClock, Readings};
    use tempfile::TempDir;

    fn clock_at(day: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(),
        ))
    }

    fn store_with(clock: Arc<ManualClock>) -> RecordStore {
        RecordStore::in_memory_with_clock(clock).unwrap()
    }

    fn draft(tag: &str) -> Inspection {
        Inspection::new(tag, format!("{} pump", tag), "inspector")
    }

    #[test]
    fn test_create_queues_single_entry() {
        let store = store_with(clock_at(1));
        let record = draft("P-1");
        let id = store.create(&record).unwrap();

        let stored = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.uuid, record.uuid);
        assert_eq!(stored.local_id, Some(id));
        assert_eq!(stored.updated_at, Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap());

        let outbox = store.outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].entity_id, record.uuid);
        assert_eq!(outbox[0].operation, Operation::Create);
        assert_eq!(outbox[0].data.as_ref().unwrap().tag_id, "P-1");
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_create_synced_record_queues_nothing() {
        let store = RecordStore::in_memory().unwrap();
        let record = draft("P-2").with_status(InspectionStatus::Synced);
        store.create(&record).unwrap();

        assert_eq!(store.count_pending().unwrap(), 0);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_create_duplicate_uuid_fails_without_side_effects() {
        let store = RecordStore::in_memory().unwrap();
        let record = draft("P-3");
        store.create(&record).unwrap();

        let err = store.create(&record).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.list_all().unwrap().len(), 1);
        assert_eq!(store.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_create_rejects_invalid_record() {
        let store = RecordStore::in_memory().unwrap();
        let record = draft("P-4").with_notes("n".repeat(501));

        assert!(matches!(store.create(&record), Err(Error::InvalidInput(_))));
        assert!(store.list_all().unwrap().is_empty());
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_sequential_updates_coalesce() {
        let clock = clock_at(1);
        let store = store_with(clock.clone());
        let id = store.create(&draft("P-5")).unwrap();
        let first = store.outbox().unwrap()[0].clone();

        clock.advance(ChronoDuration::minutes(5));
        store
            .update(id, &InspectionPatch {
                notes: Some("first pass".into()),
                ..Default::default()
            })
            .unwrap();
        clock.advance(ChronoDuration::minutes(5));
        let latest = store
            .update(id, &InspectionPatch {
                notes: Some("second pass".into()),
                status: Some(InspectionStatus::Complete),
                ..Default::default()
            })
            .unwrap();

        let outbox = store.outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].operation, Operation::Update);
        assert!(outbox[0].id > first.id);
        assert_eq!(outbox[0].data.as_ref().unwrap().notes, "second pass");
        assert_eq!(latest.updated_at, clock.now());
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_update_missing_record() {
        let store = RecordStore::in_memory().unwrap();
        let missing = LocalId::new(99).unwrap();
        assert!(matches!(
            store.update(missing, &InspectionPatch::default()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.delete(missing), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_update_rolls_back_on_validation_failure() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create(&draft("P-6")).unwrap();
        let before = store.outbox().unwrap();

        let err = store
            .update(id, &InspectionPatch {
                tag_name: Some(" ".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.get_by_id(id).unwrap().unwrap().tag_name, "P-6 pump");
        assert_eq!(store.outbox().unwrap(), before);
    }

    #[test]
    fn test_editing_synced_record_makes_it_pending() {
        let store = RecordStore::in_memory().unwrap();
        let id = store
            .create(&draft("P-7").with_status(InspectionStatus::Synced))
            .unwrap();

        let edited = store
            .update(id, &InspectionPatch {
                readings: Some(Readings {
                    pressure: Some(3.3),
                    ..Readings::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(edited.status, InspectionStatus::Complete);
        assert_eq!(store.count_pending().unwrap(), 1);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_delete_unsynced_drops_entry() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create(&draft("P-8")).unwrap();
        store.delete(id).unwrap();

        assert!(store.get_by_id(id).unwrap().is_none());
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_delete_synced_leaves_tombstone() {
        let store = RecordStore::in_memory().unwrap();
        let record = draft("P-9").with_status(InspectionStatus::Synced);
        let id = store.create(&record).unwrap();
        store.delete(id).unwrap();

        assert!(store.get_by_uuid(&record.uuid).unwrap().is_none());
        let outbox = store.outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].operation, Operation::Delete);
        assert_eq!(outbox[0].data.as_ref().unwrap().uuid, record.uuid);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_acknowledge_marks_synced() {
        let clock = clock_at(1);
        let store = store_with(clock.clone());
        let id = store.create(&draft("P-10")).unwrap();
        let entry = store.outbox().unwrap().remove(0);
        let pushed = store.get_by_id(id).unwrap().unwrap();

        clock.advance(ChronoDuration::minutes(1));
        assert!(store.acknowledge(&entry, &pushed, clock.now()).unwrap());

        let record = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(record.status, InspectionStatus::Synced);
        assert_eq!(record.synced_at, Some(clock.now()));
        assert_eq!(store.count_pending().unwrap(), 0);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_acknowledge_ignores_superseded_entry() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create(&draft("P-11")).unwrap();
        let entry = store.outbox().unwrap().remove(0);
        let pushed = store.get_by_id(id).unwrap().unwrap();

        // Edited while the push was in flight.
        store
            .update(id, &InspectionPatch {
                notes: Some("late edit".into()),
                ..Default::default()
            })
            .unwrap();

        assert!(!store.acknowledge(&entry, &pushed, Utc::now()).unwrap());
        let record = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(record.status, InspectionStatus::Draft);
        assert_eq!(store.count_pending().unwrap(), 1);
        assert_eq!(store.outbox().unwrap()[0].operation, Operation::Update);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_acknowledge_after_local_delete_queues_tombstone() {
        let store = RecordStore::in_memory().unwrap();
        let id = store.create(&draft("P-12")).unwrap();
        let entry = store.outbox().unwrap().remove(0);
        let pushed = store.get_by_id(id).unwrap().unwrap();

        // Deleted before the remote confirmed the create.
        store.delete(id).unwrap();
        assert_eq!(store.count_pending().unwrap(), 0);

        assert!(!store.acknowledge(&entry, &pushed, Utc::now()).unwrap());
        let outbox = store.outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].operation, Operation::Delete);
        let snapshot = outbox[0].data.as_ref().unwrap();
        assert_eq!(snapshot.uuid, pushed.uuid);
        assert_eq!(snapshot.updated_at, pushed.updated_at);
        assert!(store.get_by_uuid(&pushed.uuid).unwrap().is_none());
        assert!(store.verify().unwrap().is_empty());

        // A pull of the copy the remote just accepted must not resurrect it.
        let outcome = store
            .merge_remote(&pushed, Utc::now(), |local, remote| {
                remote.updated_at > local.updated_at
            })
            .unwrap();
        assert_eq!(outcome, MergeOutcome::ConflictSkipped);
        assert!(store.get_by_uuid(&pushed.uuid).unwrap().is_none());
    }

    #[test]
    fn test_merge_inserts_unknown_record() {
        let store = RecordStore::in_memory().unwrap();
        let remote = draft("R-1").with_status(InspectionStatus::Complete);
        let synced_at = Utc::now();

        let outcome = store.merge_remote(&remote, synced_at, |_, _| true).unwrap();
        let MergeOutcome::Inserted(id) = outcome else {
            panic!("expected insert, got {:?}", outcome);
        };
        let stored = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.status, InspectionStatus::Synced);
        assert!(stored.synced_at.is_some());
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_merge_respects_decision() {
        let store = RecordStore::in_memory().unwrap();
        let local = draft("R-2");
        let id = store.create(&local).unwrap();

        let remote = local.clone().with_notes("from server");
        assert_eq!(
            store.merge_remote(&remote, Utc::now(), |_, _| false).unwrap(),
            MergeOutcome::ConflictSkipped
        );
        assert_eq!(store.get_by_id(id).unwrap().unwrap().notes, "");
        assert_eq!(store.count_pending().unwrap(), 1);

        assert_eq!(
            store.merge_remote(&remote, Utc::now(), |_, _| true).unwrap(),
            MergeOutcome::Updated(id)
        );
        let stored = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(stored.notes, "from server");
        assert_eq!(stored.status, InspectionStatus::Synced);
        assert_eq!(store.count_pending().unwrap(), 0);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_merge_against_tombstone() {
        let store = RecordStore::in_memory().unwrap();
        let record = draft("R-3").with_status(InspectionStatus::Synced);
        let id = store.create(&record).unwrap();
        store.delete(id).unwrap();

        assert_eq!(
            store.merge_remote(&record, Utc::now(), |_, _| false).unwrap(),
            MergeOutcome::ConflictSkipped
        );
        assert_eq!(store.count_pending().unwrap(), 1);

        let outcome = store.merge_remote(&record, Utc::now(), |_, _| true).unwrap();
        assert!(matches!(outcome, MergeOutcome::Inserted(_)));
        assert_eq!(store.count_pending().unwrap(), 0);
        assert!(store.verify().unwrap().is_empty());
    }

    #[test]
    fn test_merge_compares_at_stored_precision() {
        let store = RecordStore::in_memory().unwrap();
        let updated_at = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
            + ChronoDuration::nanoseconds(1_000_123);
        let remote = draft("R-4").with_updated_at(updated_at);
        let newer = |local: &Inspection, remote: &Inspection| remote.updated_at > local.updated_at;

        let first = store.merge_remote(&remote, Utc::now(), newer).unwrap();
        assert!(matches!(first, MergeOutcome::Inserted(_)));

        // Pulling the same unchanged copy again is a tie, not a newer version.
        let second = store.merge_remote(&remote, Utc::now(), newer).unwrap();
        assert_eq!(second, MergeOutcome::ConflictSkipped);

        let stored = store.get_by_uuid(&remote.uuid).unwrap().unwrap();
        assert_eq!(
            stored.updated_at,
            updated_at - ChronoDuration::nanoseconds(123)
        );
    }

    #[test]
    fn test_last_sync_time_round_trip() {
        let store = RecordStore::in_memory().unwrap();
        assert!(store.last_sync_time().unwrap().is_none());

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        store.set_last_sync_time(at).unwrap();
        assert_eq!(store.last_sync_time().unwrap(), Some(at));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fieldsync.db");
        let record = draft("P-12").with_photo(vec![1, 2, 3]);

        {
            let store = RecordStore::open(&path).unwrap();
            store.create(&record).unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        let stored = store.get_by_uuid(&record.uuid).unwrap().unwrap();
        assert_eq!(stored.photos, vec![vec![1, 2, 3]]);
        assert_eq!(store.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_outbox_is_fifo() {
        let clock = clock_at(1);
        let store = store_with(clock.clone());
        let mut expected = Vec::new();
        for tag in ["A", "B", "C"] {
            let record = draft(tag);
            expected.push(record.uuid);
            store.create(&record).unwrap();
            clock.advance(ChronoDuration::seconds(1));
        }

        let order: Vec<Uuid> = store.outbox().unwrap().iter().map(|e| e.entity_id).collect();
        assert_eq!(order, expected);
    }

    mod invariant {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Create(bool),
            Update(usize, Option<InspectionStatus>),
            Delete(usize),
            Acknowledge(usize),
        }

        fn step() -> impl Strategy<Value = Step> {
            let status = prop_oneof![
                Just(None),
                Just(Some(InspectionStatus::Draft)),
                Just(Some(InspectionStatus::Complete)),
                Just(Some(InspectionStatus::Synced)),
            ];
            prop_oneof![
                any::<bool>().prop_map(Step::Create),
                (0..8usize, status).prop_map(|(i, s)| Step::Update(i, s)),
                (0..8usize).prop_map(Step::Delete),
                (0..8usize).prop_map(Step::Acknowledge),
            ]
        }

        proptest! {
            #[test]
            fn record_and_outbox_stay_consistent(steps in prop::collection::vec(step(), 1..40)) {
                let store = RecordStore::in_memory().unwrap();
                for step in steps {
                    let ids: Vec<LocalId> = store
                        .list_all()
                        .unwrap()
                        .iter()
                        .filter_map(|r| r.local_id)
                        .collect();
                    match step {
                        Step::Create(synced) => {
                            let mut record = draft("T");
                            if synced {
                                record.status = InspectionStatus::Synced;
                            }
                            store.create(&record).unwrap();
                        }
                        Step::Update(i, status) if !ids.is_empty() => {
                            let patch = InspectionPatch { status, notes: Some(format!("{}", i)), ..Default::default() };
                            store.update(ids[i % ids.len()], &patch).unwrap();
                        }
                        Step::Delete(i) if !ids.is_empty() => {
                            store.delete(ids[i % ids.len()]).unwrap();
                        }
                        Step::Acknowledge(i) => {
                            let outbox = store.outbox().unwrap();
                            if !outbox.is_empty() {
                                let entry = &outbox[i % outbox.len()];
                                let pushed = store
                                    .get_by_uuid(&entry.entity_id)
                                    .unwrap()
                                    .or_else(|| entry.data.clone())
                                    .unwrap();
                                store.acknowledge(entry, &pushed, Utc::now()).unwrap();
                            }
                        }
                        _ => {}
                    }
                    prop_assert!(store.verify().unwrap().is_empty());
                    let pending = store.list_all().unwrap().iter().filter(|r| r.is_pending()).count();
                    let live: usize = store.outbox().unwrap().iter().filter(|e| e.operation != Operation::Delete).count();
                    prop_assert_eq!(pending, live);
                }
            }
        }
    }
}
