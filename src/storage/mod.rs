//! SQLite storage for the word catalog, memory states, review log and daily
//! statistics.
//!
//! - `words` / `senses`: the learnable catalog, in insertion order
//! - `srs_state`: one memory state per reviewed sense
//! - `review_log`: append-only rating history
//! - `daily_stats`: signed per-day activity counters

pub mod daily_stats;
pub mod migrations;
pub mod models;
pub mod review_store;
pub mod word;

pub use daily_stats::{DailyStatsRepository, DailyStatsValidator};
pub use migrations::run_migrations;
pub use models::*;
pub use word::WordRepository;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::platform::{PlatformError, PlatformProvider};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to acquire connection lock: {0}")]
    LockError(String),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Shared handle to the application database.
///
/// Cloning is cheap; all clones serialize on the same connection.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Storage {
    /// Opens (or creates) the database file and brings its schema up to date.
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(path)?;
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        Self::with_connection(connection, path.to_string_lossy().to_string())
    }

    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;

        Self::with_connection(connection, ":memory:".to_string())
    }

    fn with_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        migrations::run_migrations(&connection)?;
        tracing::debug!(db_path = %db_path, "storage opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
            db_path,
        })
    }

    /// File path, or `:memory:`.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// Catalog repository sharing this connection.
    pub fn words(&self) -> WordRepository {
        WordRepository::new(Arc::clone(&self.conn))
    }

    /// Daily stats repository signing with `platform`.
    pub fn daily_stats(&self, platform: Arc<dyn PlatformProvider>) -> DailyStatsRepository {
        DailyStatsRepository::new(Arc::clone(&self.conn), DailyStatsValidator::new(platform))
    }

    /// Runs `f` inside a transaction, rolling back if it returns an error.
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self.get_connection()?;

        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_in_memory() {
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");
        assert_eq!(storage.db_path(), ":memory:");

        let conn = storage.get_connection().expect("Failed to get connection");
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn test_transaction_commits() {
        let storage = Storage::in_memory().unwrap();
        let result = storage.transaction(|conn| {
            conn.execute(
                "INSERT INTO words (id, lemma, lang) VALUES ('w1', 'run', 'en')",
                [],
            )?;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert!(storage.words().get_word("w1").unwrap().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let storage = Storage::in_memory().unwrap();
        let result: StorageResult<()> = storage.transaction(|conn| {
            conn.execute(
                "INSERT INTO words (id, lemma, lang) VALUES ('w1', 'run', 'en')",
                [],
            )?;
            Err(StorageError::NotFound("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(storage.words().get_word("w1").unwrap().is_none());
    }

    #[test]
    fn test_file_storage_reopens_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lexiflow.db");

        {
            let storage = Storage::new(&path).unwrap();
            storage.words().insert_word("w1", "bank", "en").unwrap();
        }

        let storage = Storage::new(&path).unwrap();
        let word = storage.words().get_word("w1").unwrap().unwrap();
        assert_eq!(word.lemma, "bank");
    }
}
