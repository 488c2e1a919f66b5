use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use lexiflow_core::platform::{EphemeralPlatform, NativePlatform, PlatformProvider};
use lexiflow_core::services::analytics::{self, HeatmapMetric};
use lexiflow_core::services::fsrs::Rating;
use lexiflow_core::services::review_scheduler::{
    NewCardOrder, ReviewError, ReviewScheduler, ReviewStore,
};
use lexiflow_core::storage::Storage;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn seeded_storage() -> Storage {
    let storage = Storage::in_memory().expect("in-memory storage");
    seed_catalog(&storage);
    storage
}

fn seed_catalog(storage: &Storage) {
    let words = storage.words();
    words.insert_word("w-bank", "bank", "en").unwrap();
    words.insert_word("w-run", "run", "en").unwrap();
    words
        .insert_sense("bank-1", "w-bank", "noun", "financial institution", 0)
        .unwrap();
    words
        .insert_sense("bank-2", "w-bank", "noun", "edge of a river", 1)
        .unwrap();
    words
        .insert_sense("run-1", "w-run", "verb", "move quickly on foot", 0)
        .unwrap();
}

fn ids(batch: &[lexiflow_core::ReviewCandidate]) -> Vec<&str> {
    batch.iter().map(|c| c.sense_id.as_str()).collect()
}

#[test]
fn test_new_senses_follow_catalog_order() {
    let storage = seeded_storage();
    let scheduler = ReviewScheduler::new(&storage);

    let batch = scheduler.next_batch(3, now()).unwrap();
    assert_eq!(ids(&batch), vec!["bank-1", "bank-2", "run-1"]);
    assert!(batch.iter().all(|c| c.is_new()));

    assert_eq!(ids(&scheduler.next_batch(2, now()).unwrap()), vec!["bank-1", "bank-2"]);
    assert!(scheduler.next_batch(0, now()).unwrap().is_empty());
}

#[test]
fn test_review_persists_state_and_log() {
    let storage = seeded_storage();
    let scheduler = ReviewScheduler::new(&storage);

    let recorded = scheduler
        .record_review("bank-1", Rating::Good, 4_200, now())
        .unwrap();
    assert!(recorded.first_exposure);
    assert!(recorded.state.due > now());

    let stored = storage.memory_state("bank-1").unwrap().unwrap();
    assert_eq!(stored.lapses, 0);
    assert!((stored.stability - recorded.state.stability).abs() < 1e-9);
    assert!((stored.difficulty - recorded.state.difficulty).abs() < 1e-9);
    assert_eq!(stored.due.timestamp_millis(), recorded.state.due.timestamp_millis());

    let logs = storage.review_logs_for("bank-1").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].rating, Rating::Good);
    assert_eq!(logs[0].duration_ms, 4_200);

    let batch = scheduler.next_batch(3, now()).unwrap();
    assert_eq!(ids(&batch), vec!["bank-2", "run-1"]);
}

#[test]
fn test_due_senses_come_before_new_ones() {
    let storage = seeded_storage();
    let scheduler = ReviewScheduler::new(&storage);

    scheduler.record_review("run-1", Rating::Good, 0, now()).unwrap();
    scheduler
        .record_review("bank-2", Rating::Again, 0, now())
        .unwrap();

    let later = now() + Duration::days(60);
    let batch = scheduler.next_batch(3, later).unwrap();

    // bank-2 was forgotten so it falls due before run-1
    assert_eq!(ids(&batch), vec!["bank-2", "run-1", "bank-1"]);
    assert!(!batch[0].is_new());
    assert!(batch[2].is_new());

    let second = scheduler
        .record_review("bank-2", Rating::Good, 0, later)
        .unwrap();
    assert!(!second.first_exposure);
    assert_eq!(second.state.lapses, 1);
}

#[test]
fn test_unknown_sense_is_not_found() {
    let storage = seeded_storage();
    let scheduler = ReviewScheduler::new(&storage);

    let err = scheduler
        .record_review("missing", Rating::Hard, 0, now())
        .unwrap_err();
    assert!(matches!(err, ReviewError::NotFound(id) if id == "missing"));
    assert_eq!(storage.count_review_logs().unwrap(), 0);
}

#[test]
fn test_failed_write_rolls_back_state() {
    let storage = seeded_storage();
    storage
        .get_connection()
        .unwrap()
        .execute_batch("DROP TABLE review_log;")
        .unwrap();

    let scheduler = ReviewScheduler::new(&storage);
    let err = scheduler
        .record_review("bank-1", Rating::Good, 0, now())
        .unwrap_err();

    assert!(matches!(err, ReviewError::PersistenceFailure { ref sense_id, .. } if sense_id == "bank-1"));
    assert!(storage.memory_state("bank-1").unwrap().is_none());
}

#[test]
fn test_shuffled_new_order_is_seeded() {
    let storage = seeded_storage();
    let first = ReviewScheduler::new(&storage)
        .with_new_order(NewCardOrder::Shuffled { seed: 7 })
        .next_batch(3, now())
        .unwrap();
    let second = ReviewScheduler::new(&storage)
        .with_new_order(NewCardOrder::Shuffled { seed: 7 })
        .next_batch(3, now())
        .unwrap();

    assert_eq!(first, second);
    let mut sorted = ids(&first);
    sorted.sort_unstable();
    assert_eq!(sorted, vec!["bank-1", "bank-2", "run-1"]);
}

#[test]
fn test_file_storage_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("lexiflow.db");
    let platform = NativePlatform::new(dir.path(), &db_path);

    {
        let storage = platform.open_storage().unwrap();
        seed_catalog(&storage);
        ReviewScheduler::new(&storage)
            .record_review("run-1", Rating::Hard, 1_000, now())
            .unwrap();
    }

    let storage = platform.open_storage().unwrap();
    assert!(storage.memory_state("run-1").unwrap().is_some());
    assert_eq!(storage.review_logs_for("run-1").unwrap().len(), 1);
    assert_eq!(storage.words().count_senses().unwrap(), 3);
}

#[test]
fn test_activity_feeds_verified_heatmap() {
    let storage = seeded_storage();
    let platform: Arc<dyn PlatformProvider> = Arc::new(EphemeralPlatform::with_secret("secret"));
    let stats = storage.daily_stats(Arc::clone(&platform));
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

    for (offset, words) in [(2u64, 4u32), (1, 8), (0, 12)] {
        let date = today - chrono::Days::new(offset);
        stats.record_activity(date, 300, words, 10).unwrap();
    }

    let report = analytics::load_report(&stats, HeatmapMetric::Words, today).unwrap();
    assert_eq!(report.days.len(), 365);
    assert_eq!(report.summary.total_study_days, 3);
    assert_eq!(report.summary.current_streak, 3);
    assert_eq!(report.summary.total_study_seconds, 900);

    let tail: Vec<u32> = report.days[362..].iter().map(|d| d.raw_value).collect();
    assert_eq!(tail, vec![4, 8, 12]);
    assert!(report.days[..362].iter().all(|d| d.level == 0));

    let foreign = storage.daily_stats(Arc::new(EphemeralPlatform::with_secret("other")));
    let empty = analytics::load_report(&foreign, HeatmapMetric::Words, today).unwrap();
    assert_eq!(empty.summary.total_study_days, 0);
}
