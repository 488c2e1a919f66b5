//! Word and sense catalog.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage::models::{Sense, Word};
use crate::storage::{StorageError, StorageResult};

/// Catalog reads and writes over the shared connection.
pub struct WordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// Inserts a word, leaving an existing row with the same id untouched.
    pub fn insert_word(&self, id: &str, lemma: &str, lang: &str) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO words (id, lemma, lang) VALUES (?1, ?2, ?3)",
            params![id, lemma, lang],
        )?;
        Ok(())
    }

    /// Inserts a sense of an existing word.
    pub fn insert_sense(
        &self,
        id: &str,
        word_id: &str,
        pos: &str,
        gloss: &str,
        order: i32,
    ) -> StorageResult<()> {
        let conn = self.get_connection()?;

        let word_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM words WHERE id = ?1)",
            [word_id],
            |row| row.get(0),
        )?;
        if !word_exists {
            return Err(StorageError::NotFound(format!("word {word_id}")));
        }

        conn.execute(
            "INSERT OR IGNORE INTO senses (id, word_id, pos, gloss, sense_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, word_id, pos, gloss, order],
        )?;
        Ok(())
    }

    /// Looks up a word by id.
    pub fn get_word(&self, id: &str) -> StorageResult<Option<Word>> {
        let conn = self.get_connection()?;
        let word = conn
            .query_row(
                "SELECT id, lemma, lang FROM words WHERE id = ?1",
                [id],
                Word::from_row,
            )
            .optional()?;
        Ok(word)
    }

    /// Looks up a sense by id.
    pub fn get_sense(&self, id: &str) -> StorageResult<Option<Sense>> {
        let conn = self.get_connection()?;
        let sense = conn
            .query_row(
                "SELECT id, word_id, pos, gloss, sense_order FROM senses WHERE id = ?1",
                [id],
                Sense::from_row,
            )
            .optional()?;
        Ok(sense)
    }

    /// Senses of a word in display order.
    pub fn get_senses_for_word(&self, word_id: &str) -> StorageResult<Vec<Sense>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, word_id, pos, gloss, sense_order FROM senses
             WHERE word_id = ?1 ORDER BY sense_order, rowid",
        )?;
        let senses = stmt
            .query_map([word_id], Sense::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(senses)
    }

    /// Total number of senses in the catalog.
    pub fn count_senses(&self) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row("SELECT COUNT(*) FROM senses", [], |row| row.get(0))?;
        Ok(count)
    }
}
