//! Signed per-day activity counters.
//!
//! Every row carries an HMAC over its counters keyed by the device secret,
//! so edits made outside the app are detectable.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::platform::{crypto, PlatformError, PlatformProvider};
use crate::storage::models::{format_date, DailyStats};
use crate::storage::{StorageError, StorageResult};

/// Signs and verifies [`DailyStats`] rows with the platform's HMAC.
#[derive(Clone)]
pub struct DailyStatsValidator {
    platform: Arc<dyn PlatformProvider>,
}

impl DailyStatsValidator {
    pub fn new(platform: Arc<dyn PlatformProvider>) -> Self {
        Self { platform }
    }

    /// Signature over the row's counters keyed by the device secret.
    pub fn sign(&self, stats: &DailyStats) -> Result<String, PlatformError> {
        let secret = self.platform.device_secret()?;
        self.platform.hmac(&stats.signing_payload(), &secret)
    }

    /// Recomputes the signature through the same provider that signed the
    /// row and compares in constant time. Any platform failure counts as
    /// invalid.
    pub fn is_valid(&self, stats: &DailyStats) -> bool {
        match self.sign(stats) {
            Ok(expected) => crypto::signatures_match(&expected, &stats.sig),
            Err(e) => {
                tracing::warn!(error = %e, "cannot recompute stats signature, treating as unverified");
                false
            }
        }
    }
}

/// Access to the `daily_stats` table; every write is re-signed.
pub struct DailyStatsRepository {
    conn: Arc<Mutex<Connection>>,
    validator: DailyStatsValidator,
}

impl DailyStatsRepository {
    pub fn new(conn: Arc<Mutex<Connection>>, validator: DailyStatsValidator) -> Self {
        Self { conn, validator }
    }

    fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// The stored row for `date`, signature unchecked.
    pub fn get(&self, date: NaiveDate) -> StorageResult<Option<DailyStats>> {
        let conn = self.get_connection()?;
        Self::get_with(&conn, date)
    }

    fn get_with(conn: &Connection, date: NaiveDate) -> StorageResult<Option<DailyStats>> {
        let stats = conn
            .query_row(
                "SELECT date, focus_seconds, new_learned_words, reviews, sig
                 FROM daily_stats WHERE date = ?1",
                [format_date(date)],
                DailyStats::from_row,
            )
            .optional()?;
        Ok(stats)
    }

    /// Every stored day, oldest first, signatures unchecked.
    pub fn all(&self) -> StorageResult<Vec<DailyStats>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT date, focus_seconds, new_learned_words, reviews, sig
             FROM daily_stats ORDER BY date",
        )?;
        let rows = stmt
            .query_map([], DailyStats::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Days whose signature verifies; tampered rows are logged and skipped.
    pub fn all_verified(&self) -> StorageResult<Vec<DailyStats>> {
        let (valid, rejected): (Vec<_>, Vec<_>) = self
            .all()?
            .into_iter()
            .partition(|stats| self.validator.is_valid(stats));

        for stats in &rejected {
            tracing::warn!(date = %stats.date, "daily stats signature mismatch, row ignored");
        }

        Ok(valid)
    }

    /// Adds to the counters of `date` and re-signs the row.
    pub fn record_activity(
        &self,
        date: NaiveDate,
        focus_seconds: u32,
        new_words: u32,
        reviews: u32,
    ) -> StorageResult<DailyStats> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let mut stats = Self::get_with(&tx, date)?.unwrap_or_else(|| DailyStats::empty(date));
        stats.focus_seconds = stats.focus_seconds.saturating_add(focus_seconds);
        stats.new_learned_words = stats.new_learned_words.saturating_add(new_words);
        stats.reviews = stats.reviews.saturating_add(reviews);
        stats.sig = self.validator.sign(&stats)?;

        tx.execute(
            r#"
            INSERT INTO daily_stats (date, focus_seconds, new_learned_words, reviews, sig)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(date) DO UPDATE SET
                focus_seconds = excluded.focus_seconds,
                new_learned_words = excluded.new_learned_words,
                reviews = excluded.reviews,
                sig = excluded.sig
            "#,
            params![
                format_date(stats.date),
                stats.focus_seconds,
                stats.new_learned_words,
                stats.reviews,
                stats.sig,
            ],
        )?;
        tx.commit()?;

        Ok(stats)
    }
}
