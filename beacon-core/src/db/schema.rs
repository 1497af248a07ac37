//! Queue schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: queue entries
    r#"
    -- AUTOINCREMENT keeps ids monotonic across deletes. A plain rowid key
    -- would hand max(id)+1 out again after the newest row is purged, and a
    -- late acknowledgment could then mark the wrong record.
    CREATE TABLE IF NOT EXISTS queue_entries (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id         TEXT NOT NULL,
        kind             TEXT NOT NULL,
        timestamp        INTEGER NOT NULL,
        synced           INTEGER NOT NULL DEFAULT 0 CHECK (synced IN (0, 1)),
        enqueued_at      DATETIME NOT NULL,

        -- Full record in wire form
        payload          JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_queue_timestamp ON queue_entries(timestamp);
    CREATE INDEX IF NOT EXISTS idx_queue_kind ON queue_entries(kind, id);
    CREATE INDEX IF NOT EXISTS idx_queue_synced ON queue_entries(synced, id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking queue migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running queue migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
