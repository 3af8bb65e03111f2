//! Row mapping between SQLite and the domain model.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use fieldsync_common::types::{from_micros, to_micros};
use fieldsync_common::{
    EntityKind, Error, GeoPoint, Inspection, LocalId, Operation, OutboxEntry, Readings, Result,
    Timestamp,
};

pub(crate) const INSPECTION_COLUMNS: &str = "id, uuid, tag_id, tag_name, timestamp, \
     temperature, pressure, flow_rate, vibration, notes, photos, status, created_by, \
     lat, lng, updated_at, synced_at";

pub(crate) const OUTBOX_COLUMNS: &str = "id, entity_id, entity, operation, created_at, data";

/// Convert a database failure into the common storage error.
pub(crate) fn db_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let micros: i64 = row.get(idx)?;
    from_micros(micros).map_err(|e| conversion_err(idx, e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn encode_photos(photos: &[Vec<u8>]) -> Result<String> {
    let encoded: Vec<String> = photos.iter().map(|p| STANDARD.encode(p)).collect();
    Ok(serde_json::to_string(&encoded)?)
}

fn decode_photos(raw: &str) -> Result<Vec<Vec<u8>>> {
    let encoded: Vec<String> = serde_json::from_str(raw)?;
    encoded
        .iter()
        .map(|e| {
            STANDARD
                .decode(e)
                .map_err(|err| Error::Serialization(format!("Invalid photo encoding: {}", err)))
        })
        .collect()
}

pub(crate) fn read_inspection(row: &Row<'_>) -> rusqlite::Result<Inspection> {
    let id: i64 = row.get(0)?;
    let photos_raw: String = row.get(10)?;
    let lat: Option<f64> = row.get(13)?;
    let lng: Option<f64> = row.get(14)?;
    let synced_at: Option<i64> = row.get(16)?;

    Ok(Inspection {
        local_id: Some(LocalId::new(id).map_err(|e| conversion_err(0, e))?),
        uuid: uuid_at(row, 1)?,
        tag_id: row.get(2)?,
        tag_name: row.get(3)?,
        timestamp: timestamp_at(row, 4)?,
        readings: Readings {
            temperature: row.get(5)?,
            pressure: row.get(6)?,
            flow_rate: row.get(7)?,
            vibration: row.get(8)?,
        },
        notes: row.get(9)?,
        photos: decode_photos(&photos_raw).map_err(|e| conversion_err(10, e))?,
        status: parsed_at(row, 11)?,
        created_by: row.get(12)?,
        location: match (lat, lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        },
        updated_at: timestamp_at(row, 15)?,
        synced_at: synced_at
            .map(|m| from_micros(m).map_err(|e| conversion_err(16, e)))
            .transpose()?,
    })
}

pub(crate) fn read_outbox_entry(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let data: Option<String> = row.get(5)?;
    let data = data
        .map(|raw| serde_json::from_str::<Inspection>(&raw).map_err(|e| conversion_err(5, e)))
        .transpose()?;

    Ok(OutboxEntry {
        id: row.get(0)?,
        entity_id: uuid_at(row, 1)?,
        entity: parsed_at::<EntityKind>(row, 2)?,
        operation: parsed_at::<Operation>(row, 3)?,
        created_at: timestamp_at(row, 4)?,
        data,
    })
}

pub(crate) fn find_by_id(conn: &Connection, local_id: LocalId) -> Result<Option<Inspection>> {
    let sql = format!("SELECT {} FROM inspections WHERE id = ?1", INSPECTION_COLUMNS);
    conn.query_row(&sql, [local_id.get()], read_inspection)
        .optional()
        .map_err(db_err)
}

pub(crate) fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Inspection>> {
    let sql = format!("SELECT {} FROM inspections WHERE uuid = ?1", INSPECTION_COLUMNS);
    conn.query_row(&sql, [uuid.to_string()], read_inspection)
        .optional()
        .map_err(db_err)
}

pub(crate) fn find_entry(conn: &Connection, uuid: &Uuid) -> Result<Option<OutboxEntry>> {
    let sql = format!("SELECT {} FROM outbox WHERE entity_id = ?1", OUTBOX_COLUMNS);
    conn.query_row(&sql, [uuid.to_string()], read_outbox_entry)
        .optional()
        .map_err(db_err)
}

/// Insert a new row, returning the assigned handle.
pub(crate) fn insert_inspection(conn: &Connection, record: &Inspection) -> Result<LocalId> {
    let photos = encode_photos(&record.photos)?;
    let result = conn.execute(
        r#"
        INSERT INTO inspections
        (uuid, tag_id, tag_name, timestamp, temperature, pressure, flow_rate, vibration,
         notes, photos, status, created_by, lat, lng, updated_at, synced_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
        params![
            record.uuid.to_string(),
            record.tag_id,
            record.tag_name,
            to_micros(record.timestamp),
            record.readings.temperature,
            record.readings.pressure,
            record.readings.flow_rate,
            record.readings.vibration,
            record.notes,
            photos,
            record.status.as_str(),
            record.created_by,
            record.location.map(|l| l.lat),
            record.location.map(|l| l.lng),
            to_micros(record.updated_at),
            record.synced_at.map(to_micros),
        ],
    );

    match result {
        Ok(_) => LocalId::new(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::Storage(format!(
                "Inspection {} already exists",
                record.uuid
            )))
        }
        Err(e) => Err(db_err(e)),
    }
}

/// Overwrite every column of an existing row except its handle and uuid.
pub(crate) fn write_inspection(conn: &Connection, local_id: LocalId, record: &Inspection) -> Result<()> {
    let photos = encode_photos(&record.photos)?;
    let changed = conn
        .execute(
            r#"
            UPDATE inspections SET
                tag_id = ?2, tag_name = ?3, timestamp = ?4, temperature = ?5, pressure = ?6,
                flow_rate = ?7, vibration = ?8, notes = ?9, photos = ?10, status = ?11,
                created_by = ?12, lat = ?13, lng = ?14, updated_at = ?15, synced_at = ?16
            WHERE id = ?1
            "#,
            params![
                local_id.get(),
                record.tag_id,
                record.tag_name,
                to_micros(record.timestamp),
                record.readings.temperature,
                record.readings.pressure,
                record.readings.flow_rate,
                record.readings.vibration,
                record.notes,
                photos,
                record.status.as_str(),
                record.created_by,
                record.location.map(|l| l.lat),
                record.location.map(|l| l.lng),
                to_micros(record.updated_at),
                record.synced_at.map(to_micros),
            ],
        )
        .map_err(db_err)?;

    if changed == 0 {
        return Err(Error::NotFound(format!("Inspection {} not found", local_id)));
    }
    Ok(())
}

/// Append an outbox entry. Any existing entry for the entity must already be gone.
pub(crate) fn enqueue(
    conn: &Connection,
    entity_id: &Uuid,
    operation: Operation,
    created_at: Timestamp,
    data: Option<&Inspection>,
) -> Result<i64> {
    let data = data.map(serde_json::to_string).transpose()?;
    conn.execute(
        r#"
        INSERT INTO outbox (entity_id, entity, operation, created_at, data)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            entity_id.to_string(),
            EntityKind::Inspection.as_str(),
            operation.as_str(),
            to_micros(created_at),
            data,
        ],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

/// Remove the outbox entry for an entity, if any.
pub(crate) fn remove_entry_for(conn: &Connection, entity_id: &Uuid) -> Result<usize> {
    conn.execute(
        "DELETE FROM outbox WHERE entity_id = ?1",
        [entity_id.to_string()],
    )
    .map_err(db_err)
}
