//! [`ReviewStore`] over the SQLite schema.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::services::fsrs::MemoryState;
use crate::services::review_scheduler::{
    ReviewCandidate, ReviewLogEntry, ReviewStore, ReviewWriter,
};
use crate::storage::models::{
    candidate_from_row, memory_state_from_row, review_log_from_row, to_millis,
};
use crate::storage::{Storage, StorageResult};

/// Catalog order: word insertion order, then sense order.
const CATALOG_ORDER: &str = "w.rowid, s.sense_order, s.rowid";

struct SqliteWriter<'a> {
    conn: &'a Connection,
}

impl ReviewWriter for SqliteWriter<'_> {
    fn upsert_memory_state(&self, sense_id: &str, state: &MemoryState) -> StorageResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO srs_state (sense_id, stability, difficulty, lapses, due, last_review_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(sense_id) DO UPDATE SET
                stability = excluded.stability,
                difficulty = excluded.difficulty,
                lapses = excluded.lapses,
                due = excluded.due,
                last_review_at = excluded.last_review_at
            "#,
            params![
                sense_id,
                state.stability,
                state.difficulty,
                state.lapses,
                to_millis(state.due),
                to_millis(state.last_review_at),
            ],
        )?;
        Ok(())
    }

    fn append_review_log(&self, entry: &ReviewLogEntry) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO review_log (sense_id, rating, timestamp, duration_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.sense_id,
                entry.rating.value(),
                to_millis(entry.timestamp),
                entry.duration_ms,
            ],
        )?;
        Ok(())
    }
}

impl ReviewStore for Storage {
    fn due_candidates(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReviewCandidate>> {
        let conn = self.get_connection()?;
        let sql = format!(
            r#"
            SELECT s.id AS sense_id, s.word_id, st.stability, st.difficulty,
                   st.lapses, st.due, st.last_review_at
            FROM srs_state st
            JOIN senses s ON s.id = st.sense_id
            JOIN words w ON w.id = s.word_id
            WHERE st.due <= ?1
            ORDER BY st.due ASC, {CATALOG_ORDER}
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let due = stmt
            .query_map([to_millis(now)], |row| candidate_from_row(row, true))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(due)
    }

    fn new_candidates(&self, limit: usize) -> StorageResult<Vec<ReviewCandidate>> {
        let conn = self.get_connection()?;
        let sql = format!(
            r#"
            SELECT s.id AS sense_id, s.word_id
            FROM senses s
            JOIN words w ON w.id = s.word_id
            LEFT JOIN srs_state st ON st.sense_id = s.id
            WHERE st.sense_id IS NULL
            ORDER BY {CATALOG_ORDER}
            LIMIT ?1
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let fresh = stmt
            .query_map([limit], |row| candidate_from_row(row, false))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fresh)
    }

    fn memory_state(&self, sense_id: &str) -> StorageResult<Option<MemoryState>> {
        let conn = self.get_connection()?;
        let state = conn
            .query_row(
                "SELECT stability, difficulty, lapses, due, last_review_at
                 FROM srs_state WHERE sense_id = ?1",
                [sense_id],
                memory_state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    fn contains_sense(&self, sense_id: &str) -> StorageResult<bool> {
        let conn = self.get_connection()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM senses WHERE id = ?1)",
            [sense_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&dyn ReviewWriter) -> StorageResult<()>,
    ) -> StorageResult<()> {
        self.transaction(|conn| work(&SqliteWriter { conn }))
    }
}

impl Storage {
    /// Rating history of one sense, oldest first.
    pub fn review_logs_for(&self, sense_id: &str) -> StorageResult<Vec<ReviewLogEntry>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT sense_id, rating, timestamp, duration_ms FROM review_log
             WHERE sense_id = ?1 ORDER BY timestamp, id",
        )?;
        let logs = stmt
            .query_map([sense_id], review_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Total number of logged reviews.
    pub fn count_review_logs(&self) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row("SELECT COUNT(*) FROM review_log", [], |row| row.get(0))?;
        Ok(count)
    }
}
