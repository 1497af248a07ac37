//! Durable queue repository
//!
//! Blocking SQLite operations on the queue table. Every operation is a
//! single statement or a single transaction, which is the only atomicity the
//! rest of the system relies on. Two processes (the page and the background
//! worker) may hold connections to the same file at once.

use crate::error::{Error, Result};
use crate::types::{EventKind, EventRecord, QueueEntry, QueueStats};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Queue handle over a single connection
pub struct EventQueue {
    conn: Mutex<Connection>,
}

impl EventQueue {
    /// Open or create a queue database at the given path
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        // WAL lets the page and the worker read while the other writes.
        // FULL sync so an enqueue that returned is on disk.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory queue (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this queue
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        super::schema::run_migrations(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::QueueUnavailable("queue connection lock poisoned".to_string()))
    }

    /// Append a record as an unsynced entry, returning its sequence id
    pub fn enqueue(&self, record: &EventRecord) -> Result<i64> {
        let payload = serde_json::to_string(record)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO queue_entries (event_id, kind, timestamp, synced, enqueued_at, payload)
            VALUES (?1, ?2, ?3, 0, ?4, ?5)
            "#,
            params![
                record.event_id(),
                record.kind().as_str(),
                record.timestamp(),
                Utc::now().to_rfc3339(),
                payload,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_unsynced(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_entries WHERE synced = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// All unsynced entries in insertion order.
    ///
    /// Rows whose payload no longer parses are skipped and logged; they stay
    /// in the table for inspection.
    pub fn list_unsynced(&self) -> Result<Vec<QueueEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload FROM queue_entries WHERE synced = 0 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            match serde_json::from_str::<EventRecord>(&payload) {
                Ok(record) => entries.push(QueueEntry {
                    id,
                    record,
                    synced: false,
                }),
                Err(e) => {
                    tracing::warn!(id, error = %e, "Skipping unreadable queue entry");
                }
            }
        }
        Ok(entries)
    }

    /// Fetch a single entry regardless of its synced state
    pub fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT payload, synced FROM queue_entries WHERE id = ?1",
                [id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        match row {
            Some((payload, synced)) => Ok(Some(QueueEntry {
                id,
                record: serde_json::from_str(&payload)?,
                synced,
            })),
            None => Ok(None),
        }
    }

    /// Flag entries as acknowledged.
    ///
    /// Ids that are already synced, unknown or purged are ignored. Returns
    /// how many entries flipped from unsynced to synced.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE queue_entries SET synced = 1 WHERE id = ?1 AND synced = 0")?;
            for id in ids {
                changed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Delete entries this pass observes as synced.
    ///
    /// Scan and delete run in one transaction and the delete re-checks the
    /// flag, so an entry is only removed if this purge saw it acknowledged.
    pub fn purge_synced(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut purged = 0;
        {
            let observed: Vec<i64> = tx
                .prepare("SELECT id FROM queue_entries WHERE synced = 1")?
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut delete = tx.prepare("DELETE FROM queue_entries WHERE id = ?1 AND synced = 1")?;
            for id in observed {
                purged += delete.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(purged)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let conn = self.lock()?;

        let (total, synced, oldest): (i64, i64, Option<i64>) = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(synced), 0),
                   MIN(CASE WHEN synced = 0 THEN timestamp END)
            FROM queue_entries
            "#,
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM queue_entries WHERE synced = 0 GROUP BY kind ORDER BY kind",
        )?;
        let mut unsynced_by_kind = Vec::new();
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))? {
            let (kind, count) = row?;
            match kind.parse::<EventKind>() {
                Ok(kind) => unsynced_by_kind.push((kind, count as usize)),
                Err(e) => tracing::warn!(error = %e, "Unknown kind in queue"),
            }
        }
        unsynced_by_kind.sort_by_key(|(kind, _)| *kind);

        let mut stmt = conn.prepare("SELECT payload FROM queue_entries WHERE synced = 0")?;
        let mut unreadable = 0;
        for payload in stmt.query_map([], |r| r.get::<_, String>(0))? {
            if serde_json::from_str::<EventRecord>(&payload?).is_err() {
                unreadable += 1;
            }
        }

        Ok(QueueStats {
            total: total as usize,
            unsynced: (total - synced) as usize,
            synced: synced as usize,
            unsynced_by_kind,
            oldest_unsynced_at: oldest,
            unreadable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPayload, VitalMetric, VitalRating};

    fn queue() -> EventQueue {
        let q = EventQueue::open_in_memory().unwrap();
        q.migrate().unwrap();
        q
    }

    fn error_record(message: &str, ts: i64) -> EventRecord {
        EventRecord::new(
            EventPayload::Error {
                message: message.to_string(),
                stack: None,
                source: None,
                line: None,
                column: None,
            },
            "s1",
            "fp",
            ts,
        )
    }

    fn vital_record(ts: i64) -> EventRecord {
        EventRecord::new(
            EventPayload::WebVital {
                metric_type: VitalMetric::Lcp,
                value: 2200.0,
                rating: VitalRating::Good,
            },
            "s1",
            "fp",
            ts,
        )
    }

    #[test]
    fn test_enqueue_and_list_in_insertion_order() {
        let q = queue();
        let a = q.enqueue(&error_record("a", 3)).unwrap();
        let b = q.enqueue(&vital_record(1)).unwrap();
        let c = q.enqueue(&error_record("c", 2)).unwrap();

        assert!(a < b && b < c);
        assert_eq!(q.count_unsynced().unwrap(), 3);

        let entries = q.list_unsynced().unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(entries.iter().all(|e| !e.synced));
    }

    #[test]
    fn test_stored_record_round_trips() {
        let q = queue();
        let rec = vital_record(7).with_url("https://app.example/checkout");
        let id = q.enqueue(&rec).unwrap();

        let entry = q.get(id).unwrap().unwrap();
        assert_eq!(entry.record, rec);
        assert!(!entry.synced);
    }

    #[test]
    fn test_mark_synced_is_idempotent_and_tolerates_unknown_ids() {
        let q = queue();
        let a = q.enqueue(&error_record("a", 1)).unwrap();
        let b = q.enqueue(&error_record("b", 2)).unwrap();

        assert_eq!(q.mark_synced(&[a, 9_999]).unwrap(), 1);
        assert_eq!(q.mark_synced(&[a, 9_999]).unwrap(), 0);
        assert_eq!(q.mark_synced(&[]).unwrap(), 0);

        let remaining: Vec<i64> = q.list_unsynced().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![b]);
        assert!(q.get(a).unwrap().unwrap().synced);
    }

    #[test]
    fn test_purge_only_removes_synced() {
        let q = queue();
        let a = q.enqueue(&error_record("a", 1)).unwrap();
        let b = q.enqueue(&error_record("b", 2)).unwrap();
        q.mark_synced(&[a]).unwrap();

        assert_eq!(q.purge_synced().unwrap(), 1);
        assert_eq!(q.purge_synced().unwrap(), 0);

        assert!(q.get(a).unwrap().is_none());
        assert!(q.get(b).unwrap().is_some());

        // Marking a purged id is a no-op, not an error
        assert_eq!(q.mark_synced(&[a]).unwrap(), 0);
    }

    #[test]
    fn test_ids_keep_increasing_after_purge() {
        let q = queue();
        let a = q.enqueue(&error_record("a", 1)).unwrap();
        q.mark_synced(&[a]).unwrap();
        q.purge_synced().unwrap();

        let b = q.enqueue(&error_record("b", 2)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_stats() {
        let q = queue();
        let a = q.enqueue(&error_record("a", 50)).unwrap();
        q.enqueue(&error_record("b", 20)).unwrap();
        q.enqueue(&vital_record(30)).unwrap();
        q.mark_synced(&[a]).unwrap();

        let stats = q.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.unsynced, 2);
        assert_eq!(stats.oldest_unsynced_at, Some(20));
        assert_eq!(stats.unreadable, 0);
        assert_eq!(
            stats.unsynced_by_kind,
            vec![(EventKind::WebVital, 1), (EventKind::Error, 1)]
        );
    }

    #[test]
    fn test_empty_stats() {
        let q = queue();
        assert_eq!(q.stats().unwrap(), QueueStats::default());
    }

    #[test]
    fn test_on_disk_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/queue.db");

        let id = {
            let q = EventQueue::open(&path, Duration::from_secs(1)).unwrap();
            q.migrate().unwrap();
            q.enqueue(&error_record("persisted", 1)).unwrap()
        };

        let q = EventQueue::open(&path, Duration::from_secs(1)).unwrap();
        q.migrate().unwrap();
        let entries = q.list_unsynced().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let q = queue();
        q.enqueue(&error_record("good", 1)).unwrap();
        q.lock()
            .unwrap()
            .execute(
                "INSERT INTO queue_entries (event_id, kind, timestamp, enqueued_at, payload)
                 VALUES ('bad', 'error', 2, '2025-01-01T00:00:00Z', 'not json')",
                [],
            )
            .unwrap();

        assert_eq!(q.count_unsynced().unwrap(), 2);
        assert_eq!(q.list_unsynced().unwrap().len(), 1);

        let stats = q.stats().unwrap();
        assert_eq!(stats.unsynced, 2);
        assert_eq!(stats.unreadable, 1);
    }
}
