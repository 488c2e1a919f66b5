//! Row types and column conversions.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::services::fsrs::{MemoryState, Rating};
use crate::services::review_scheduler::{ReviewCandidate, ReviewLogEntry};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A catalog headword.
pub struct Word {
    pub id: String,
    pub lemma: String,
    /// BCP 47 language tag, `en` by default.
    pub lang: String,
}

impl Word {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            lemma: row.get("lemma")?,
            lang: row.get("lang")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One meaning of a word; the unit that is scheduled and reviewed.
pub struct Sense {
    pub id: String,
    pub word_id: String,
    /// Part of speech.
    pub pos: String,
    pub gloss: String,
    /// Position among the word's senses; ties break on insertion order.
    pub sense_order: i32,
}

impl Sense {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            word_id: row.get("word_id")?,
            pos: row.get("pos")?,
            gloss: row.get("gloss")?,
            sense_order: row.get("sense_order")?,
        })
    }
}

/// One day of study activity, signed with the device secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    /// Effective study time.
    pub focus_seconds: u32,
    /// Senses seen for the first time that day.
    pub new_learned_words: u32,
    pub reviews: u32,
    /// Base64 HMAC over [`DailyStats::signing_payload`].
    pub sig: String,
}

impl DailyStats {
    /// Zeroed, unsigned counters for `date`.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            focus_seconds: 0,
            new_learned_words: 0,
            reviews: 0,
            sig: String::new(),
        }
    }

    /// Canonical text covered by the signature.
    pub fn signing_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            format_date(self.date),
            self.focus_seconds,
            self.new_learned_words,
            self.reviews
        )
    }

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            date: parse_date_column(row, "date")?,
            focus_seconds: counter_column(row, "focus_seconds")?,
            new_learned_words: counter_column(row, "new_learned_words")?,
            reviews: counter_column(row, "reviews")?,
            sig: row.get("sig")?,
        })
    }
}

/// Reads the `srs_state` columns of a joined row.
pub fn memory_state_from_row(row: &Row) -> rusqlite::Result<MemoryState> {
    let lapses: i64 = row.get("lapses")?;
    Ok(MemoryState {
        stability: row.get("stability")?,
        difficulty: row.get("difficulty")?,
        lapses: u32::try_from(lapses.max(0)).unwrap_or(u32::MAX),
        due: from_millis(row.get("due")?),
        last_review_at: from_millis(row.get("last_review_at")?),
    })
}

pub fn candidate_from_row(row: &Row, with_state: bool) -> rusqlite::Result<ReviewCandidate> {
    Ok(ReviewCandidate {
        sense_id: row.get("sense_id")?,
        word_id: row.get("word_id")?,
        state: if with_state {
            Some(memory_state_from_row(row)?)
        } else {
            None
        },
    })
}

pub fn review_log_from_row(row: &Row) -> rusqlite::Result<ReviewLogEntry> {
    let raw: i64 = row.get("rating")?;
    let rating = Rating::try_from(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e))
    })?;

    Ok(ReviewLogEntry {
        sense_id: row.get("sense_id")?,
        rating,
        timestamp: from_millis(row.get("timestamp")?),
        duration_ms: row.get("duration_ms")?,
    })
}

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Inverse of [`to_millis`], saturating outside chrono's range.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms > 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

fn parse_date_column(row: &Row, column: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(column)?;
    parse_date(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("invalid date: {raw}").into(),
        )
    })
}

fn counter_column(row: &Row, column: &str) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(column)?;
    Ok(u32::try_from(raw.max(0)).unwrap_or(u32::MAX))
}
