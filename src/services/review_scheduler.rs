//! Review queue selection and rating submission.
//!
//! The scheduler is stateless: every call reads what it needs from a
//! [`ReviewStore`] and hands the writes back to the store inside one
//! transaction.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::services::fsrs::{self, MemoryState, Rating};
use crate::services::time_tracker::TimeTracker;
use crate::storage::{StorageError, StorageResult};

/// A sense eligible for review, with its memory snapshot if it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    pub sense_id: String,
    /// Owning word, for grouping on screen.
    pub word_id: String,
    /// `None` for a sense that has never been reviewed.
    pub state: Option<MemoryState>,
}

impl ReviewCandidate {
    pub fn is_new(&self) -> bool {
        self.state.is_none()
    }
}

/// Append-only record of a single rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogEntry {
    pub sense_id: String,
    pub rating: Rating,
    pub timestamp: DateTime<Utc>,
    /// Time spent on the card, clamped to `>= 0`.
    pub duration_ms: i64,
}

/// Writes that must land together when a review is recorded.
pub trait ReviewWriter {
    fn upsert_memory_state(&self, sense_id: &str, state: &MemoryState) -> StorageResult<()>;
    fn append_review_log(&self, entry: &ReviewLogEntry) -> StorageResult<()>;
}

/// Storage collaborator consumed by [`ReviewScheduler`].
pub trait ReviewStore {
    /// Senses with `due <= now`, earliest first.
    fn due_candidates(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReviewCandidate>>;

    /// Up to `limit` senses without memory state, in catalog order.
    fn new_candidates(&self, limit: usize) -> StorageResult<Vec<ReviewCandidate>>;

    fn memory_state(&self, sense_id: &str) -> StorageResult<Option<MemoryState>>;

    fn contains_sense(&self, sense_id: &str) -> StorageResult<bool>;

    /// Runs `work` atomically. Nothing it wrote may survive an error.
    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&dyn ReviewWriter) -> StorageResult<()>,
    ) -> StorageResult<()>;
}

impl<T: ReviewStore + ?Sized> ReviewStore for &T {
    fn due_candidates(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReviewCandidate>> {
        (**self).due_candidates(now)
    }

    fn new_candidates(&self, limit: usize) -> StorageResult<Vec<ReviewCandidate>> {
        (**self).new_candidates(limit)
    }

    fn memory_state(&self, sense_id: &str) -> StorageResult<Option<MemoryState>> {
        (**self).memory_state(sense_id)
    }

    fn contains_sense(&self, sense_id: &str) -> StorageResult<bool> {
        (**self).contains_sense(sense_id)
    }

    fn run_in_transaction(
        &self,
        work: &mut dyn FnMut(&dyn ReviewWriter) -> StorageResult<()>,
    ) -> StorageResult<()> {
        (**self).run_in_transaction(work)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("sense not found: {0}")]
    NotFound(String),
    #[error("failed to persist review for {sense_id}: {source}")]
    PersistenceFailure {
        sense_id: String,
        #[source]
        source: StorageError,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// How senses without memory state are ordered when topping up a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "order")]
pub enum NewCardOrder {
    #[default]
    Catalog,
    /// Seeded shuffle of the whole new pool; reproducible for a given seed.
    Shuffled { seed: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedReview {
    /// State persisted for the sense.
    pub state: MemoryState,
    /// The sense had no memory state before this review.
    pub first_exposure: bool,
    /// Duration stored in the log entry, never negative.
    pub duration_ms: i64,
}

/// Builds review batches and records ratings against a [`ReviewStore`].
pub struct ReviewScheduler<S> {
    store: S,
    new_order: NewCardOrder,
}

impl<S: ReviewStore> ReviewScheduler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            new_order: NewCardOrder::Catalog,
        }
    }

    /// Replaces the default catalog ordering of new senses.
    pub fn with_new_order(mut self, order: NewCardOrder) -> Self {
        self.new_order = order;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Due senses first (earliest due first), topped up with new senses.
    ///
    /// The result never exceeds `limit`. An empty batch means there is
    /// nothing left to review.
    pub fn next_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewCandidate>, ReviewError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut batch = self.store.due_candidates(now)?;
        batch.truncate(limit);
        let due_count = batch.len();

        if due_count >= limit {
            tracing::debug!(due_count, limit, "review batch filled by due senses");
            return Ok(batch);
        }

        let new_needed = limit - due_count;
        let new_senses = match self.new_order {
            NewCardOrder::Catalog => self.store.new_candidates(new_needed)?,
            NewCardOrder::Shuffled { seed } => {
                let mut pool = self.store.new_candidates(usize::MAX)?;
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                pool.shuffle(&mut rng);
                pool.truncate(new_needed);
                pool
            }
        };

        batch.extend(new_senses.into_iter().take(new_needed));
        tracing::debug!(
            due_count,
            new_count = batch.len() - due_count,
            limit,
            "review batch assembled"
        );
        Ok(batch)
    }

    /// Applies `rating` to a sense and persists the new state together with
    /// its log entry.
    pub fn record_review(
        &self,
        sense_id: &str,
        rating: Rating,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<RecordedReview, ReviewError> {
        if !self.store.contains_sense(sense_id)? {
            return Err(ReviewError::NotFound(sense_id.to_string()));
        }

        let previous = self.store.memory_state(sense_id)?;
        let state = fsrs::next_state(rating, previous.as_ref(), now);
        let entry = ReviewLogEntry {
            sense_id: sense_id.to_string(),
            rating,
            timestamp: now,
            duration_ms: duration_ms.max(0),
        };

        self.store
            .run_in_transaction(&mut |writer: &dyn ReviewWriter| {
                writer.upsert_memory_state(sense_id, &state)?;
                writer.append_review_log(&entry)
            })
            .map_err(|err| match err {
                StorageError::NotFound(_) => ReviewError::NotFound(sense_id.to_string()),
                source => ReviewError::PersistenceFailure {
                    sense_id: sense_id.to_string(),
                    source,
                },
            })?;

        tracing::info!(
            sense_id,
            %rating,
            stability = state.stability,
            difficulty = state.difficulty,
            due = %state.due,
            "review recorded"
        );

        Ok(RecordedReview {
            state,
            first_exposure: previous.is_none(),
            duration_ms: entry.duration_ms,
        })
    }

    /// Records a review timed by `tracker`: the answer counts as an
    /// interaction and the effective time since the previous answer becomes
    /// the logged duration.
    pub fn record_timed_review(
        &self,
        sense_id: &str,
        rating: Rating,
        tracker: &mut TimeTracker,
        now: DateTime<Utc>,
    ) -> Result<RecordedReview, ReviewError> {
        tracker.on_interaction(now);
        let duration_ms = tracker.take();
        self.record_review(sense_id, rating, duration_ms, now)
    }
}

/// Senses of one word, in the order they appeared in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordGroup {
    pub word_id: String,
    pub senses: Vec<ReviewCandidate>,
}

/// Partitions a batch by owning word, ordering groups by first appearance.
pub fn group_by_word(batch: &[ReviewCandidate]) -> Vec<WordGroup> {
    let mut groups: Vec<WordGroup> = Vec::new();
    for candidate in batch {
        match groups.iter_mut().find(|g| g.word_id == candidate.word_id) {
            Some(group) => group.senses.push(candidate.clone()),
            None => groups.push(WordGroup {
                word_id: candidate.word_id.clone(),
                senses: vec![candidate.clone()],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default, Clone)]
    struct Tables {
        states: HashMap<String, MemoryState>,
        logs: Vec<ReviewLogEntry>,
    }

    /// Catalog-ordered fake whose transactions stage writes on a copy.
    #[derive(Default)]
    struct FakeStore {
        catalog: Vec<(String, String)>,
        tables: RefCell<Tables>,
        fail_log_writes: bool,
    }

    struct Staged<'a> {
        tables: &'a RefCell<Tables>,
        fail_log_writes: bool,
    }

    impl ReviewWriter for Staged<'_> {
        fn upsert_memory_state(&self, sense_id: &str, state: &MemoryState) -> StorageResult<()> {
            self.tables
                .borrow_mut()
                .states
                .insert(sense_id.to_string(), *state);
            Ok(())
        }

        fn append_review_log(&self, entry: &ReviewLogEntry) -> StorageResult<()> {
            if self.fail_log_writes {
                return Err(StorageError::Database(rusqlite::Error::InvalidQuery));
            }
            self.tables.borrow_mut().logs.push(entry.clone());
            Ok(())
        }
    }

    impl FakeStore {
        fn with_senses(senses: &[(&str, &str)]) -> Self {
            Self {
                catalog: senses
                    .iter()
                    .map(|(s, w)| (s.to_string(), w.to_string()))
                    .collect(),
                ..Default::default()
            }
        }

        fn candidate(&self, sense_id: &str, word_id: &str) -> ReviewCandidate {
            ReviewCandidate {
                sense_id: sense_id.to_string(),
                word_id: word_id.to_string(),
                state: self.tables.borrow().states.get(sense_id).copied(),
            }
        }

        fn seed_state(&self, sense_id: &str, due: DateTime<Utc>) {
            self.tables.borrow_mut().states.insert(
                sense_id.to_string(),
                MemoryState {
                    stability: 1.0,
                    difficulty: 5.0,
                    lapses: 0,
                    due,
                    last_review_at: due - Duration::days(1),
                },
            );
        }
    }

    impl ReviewStore for FakeStore {
        fn due_candidates(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReviewCandidate>> {
            let mut due: Vec<ReviewCandidate> = self
                .catalog
                .iter()
                .map(|(s, w)| self.candidate(s, w))
                .filter(|c| c.state.map(|st| st.is_due(now)).unwrap_or(false))
                .collect();
            due.sort_by_key(|c| c.state.map(|s| s.due));
            Ok(due)
        }

        fn new_candidates(&self, limit: usize) -> StorageResult<Vec<ReviewCandidate>> {
            Ok(self
                .catalog
                .iter()
                .map(|(s, w)| self.candidate(s, w))
                .filter(ReviewCandidate::is_new)
                .take(limit)
                .collect())
        }

        fn memory_state(&self, sense_id: &str) -> StorageResult<Option<MemoryState>> {
            Ok(self.tables.borrow().states.get(sense_id).copied())
        }

        fn contains_sense(&self, sense_id: &str) -> StorageResult<bool> {
            Ok(self.catalog.iter().any(|(s, _)| s == sense_id))
        }

        fn run_in_transaction(
            &self,
            work: &mut dyn FnMut(&dyn ReviewWriter) -> StorageResult<()>,
        ) -> StorageResult<()> {
            let staged = RefCell::new(self.tables.borrow().clone());
            work(&Staged {
                tables: &staged,
                fail_log_writes: self.fail_log_writes,
            })?;
            *self.tables.borrow_mut() = staged.into_inner();
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn ids(batch: &[ReviewCandidate]) -> Vec<&str> {
        batch.iter().map(|c| c.sense_id.as_str()).collect()
    }

    #[test]
    fn test_due_items_fill_batch_without_new() {
        let store = FakeStore::with_senses(&[("a", "w1"), ("b", "w1"), ("c", "w2"), ("d", "w3")]);
        store.seed_state("a", now() - Duration::hours(1));
        store.seed_state("b", now() - Duration::days(3));
        store.seed_state("c", now() - Duration::days(1));

        let batch = ReviewScheduler::new(store).next_batch(2, now()).unwrap();
        assert_eq!(ids(&batch), vec!["b", "c"]);
    }

    #[test]
    fn test_new_items_top_up_in_catalog_order() {
        let store = FakeStore::with_senses(&[("a", "w1"), ("b", "w1"), ("c", "w2"), ("d", "w3")]);
        store.seed_state("c", now() - Duration::hours(2));
        store.seed_state("d", now() + Duration::days(2));

        let batch = ReviewScheduler::new(store).next_batch(3, now()).unwrap();
        assert_eq!(ids(&batch), vec!["c", "a", "b"]);
        assert!(batch[1].is_new());
    }

    #[test]
    fn test_exhausted_pools_return_short_or_empty_batch() {
        let store = FakeStore::with_senses(&[("a", "w1")]);
        store.seed_state("a", now() + Duration::days(1));
        let scheduler = ReviewScheduler::new(store);
        assert!(scheduler.next_batch(5, now()).unwrap().is_empty());
        assert!(scheduler.next_batch(0, now()).unwrap().is_empty());
    }

    #[test]
    fn test_shuffled_order_is_reproducible() {
        let senses: Vec<(String, String)> =
            (0..20).map(|i| (format!("s{i}"), format!("w{i}"))).collect();
        let refs: Vec<(&str, &str)> = senses
            .iter()
            .map(|(s, w)| (s.as_str(), w.as_str()))
            .collect();

        let order = NewCardOrder::Shuffled { seed: 42 };
        let first = ReviewScheduler::new(FakeStore::with_senses(&refs))
            .with_new_order(order)
            .next_batch(5, now())
            .unwrap();
        let second = ReviewScheduler::new(FakeStore::with_senses(&refs))
            .with_new_order(order)
            .next_batch(5, now())
            .unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_record_review_writes_state_and_log() {
        let scheduler = ReviewScheduler::new(FakeStore::with_senses(&[("a", "w1")]));
        let recorded = scheduler
            .record_review("a", Rating::Good, 4200, now())
            .unwrap();
        assert!(recorded.first_exposure);

        let tables = scheduler.store().tables.borrow();
        assert_eq!(tables.states.get("a"), Some(&recorded.state));
        assert_eq!(tables.logs.len(), 1);
        assert_eq!(tables.logs[0].duration_ms, 4200);
        assert_eq!(tables.logs[0].timestamp, now());
    }

    #[test]
    fn test_timed_review_logs_effective_time() {
        let scheduler = ReviewScheduler::new(FakeStore::with_senses(&[("a", "w1"), ("b", "w1")]));
        let mut tracker = TimeTracker::started_at(now());

        let first = scheduler
            .record_timed_review("a", Rating::Good, &mut tracker, now() + Duration::seconds(6))
            .unwrap();
        assert_eq!(first.duration_ms, 6_000);

        // idle for two minutes before answering the second sense
        let second = scheduler
            .record_timed_review("b", Rating::Hard, &mut tracker, now() + Duration::seconds(126))
            .unwrap();
        assert_eq!(second.duration_ms, 0);

        let tables = scheduler.store().tables.borrow();
        let logged: Vec<i64> = tables.logs.iter().map(|l| l.duration_ms).collect();
        assert_eq!(logged, vec![6_000, 0]);
        assert_eq!(tracker.effective_time_ms(), 0);
    }

    #[test]
    fn test_record_review_unknown_sense() {
        let scheduler = ReviewScheduler::new(FakeStore::with_senses(&[("a", "w1")]));
        let err = scheduler
            .record_review("missing", Rating::Again, 0, now())
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn test_failed_log_write_leaves_state_untouched() {
        let mut store = FakeStore::with_senses(&[("a", "w1")]);
        store.fail_log_writes = true;
        let scheduler = ReviewScheduler::new(store);

        let err = scheduler
            .record_review("a", Rating::Good, 1000, now())
            .unwrap_err();
        assert!(matches!(err, ReviewError::PersistenceFailure { .. }));

        let tables = scheduler.store().tables.borrow();
        assert!(tables.states.is_empty());
        assert!(tables.logs.is_empty());
    }

    #[test]
    fn test_group_by_word_keeps_first_appearance_order() {
        let c = |s: &str, w: &str| ReviewCandidate {
            sense_id: s.to_string(),
            word_id: w.to_string(),
            state: None,
        };
        let batch = vec![c("a", "w2"), c("b", "w1"), c("c", "w2")];
        let groups = group_by_word(&batch);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].word_id, "w2");
        assert_eq!(ids(&groups[0].senses), vec!["a", "c"]);
        assert_eq!(ids(&groups[1].senses), vec!["b"]);
    }
}
