//! Database schema.

use rusqlite::Connection;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Metadata key holding the last successful sync time.
pub const LAST_SYNC_KEY: &str = "last_sync_time";

// Outbox ids use AUTOINCREMENT so a coalesced replacement never reuses the
// id of the entry it replaced.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inspections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    tag_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    temperature REAL,
    pressure REAL,
    flow_rate REAL,
    vibration REAL,
    notes TEXT NOT NULL,
    photos TEXT NOT NULL,
    status TEXT NOT NULL,
    created_by TEXT NOT NULL,
    lat REAL,
    lng REAL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_inspections_tag ON inspections(tag_id);
CREATE INDEX IF NOT EXISTS idx_inspections_status ON inspections(status);
CREATE INDEX IF NOT EXISTS idx_inspections_timestamp ON inspections(timestamp);

CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL UNIQUE,
    entity TEXT NOT NULL,
    operation TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    data TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_operation ON outbox(operation);
CREATE INDEX IF NOT EXISTS idx_outbox_created ON outbox(created_at);

CREATE TABLE IF NOT EXISTS sync_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Create tables and indexes if they do not exist yet.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}
