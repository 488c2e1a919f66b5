use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use lexiflow_core::config::{Config, ConfigError};
use lexiflow_core::logging;
use lexiflow_core::platform::{self, PlatformProvider};
use lexiflow_core::services::analytics::{self, HeatmapMetric};
use lexiflow_core::services::fsrs::{ParseRatingError, Rating};
use lexiflow_core::services::review_scheduler::{
    group_by_word, RecordedReview, ReviewError, ReviewScheduler,
};
use lexiflow_core::services::time_tracker::TimeTracker;
use lexiflow_core::storage::{migrations, Storage, StorageError};

const USAGE: &str = "usage: lexiflow <command>

commands:
  add-word <id> <lemma> [lang]
  add-sense <id> <word-id> <pos> <gloss> [order]
  next [limit]
  review <sense-id> <again|hard|good|0-2> [duration-ms]
  study [limit]            rate a batch interactively from stdin
  heatmap [words|time]
  migrations";

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Rating(#[from] ParseRatingError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("terminal io: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = logging::init_tracing(&config.log_level);
    config.log_warnings();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&config, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}\n\n{USAGE}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, args: &[String]) -> Result<(), CliError> {
    let Some((command, rest)) = args.split_first() else {
        return Err(CliError::Usage("missing command".to_string()));
    };

    let provider = platform::from_config(config);
    let storage = provider.open_storage()?;
    tracing::debug!(
        platform = platform::platform_name(),
        db_path = storage.db_path(),
        "lexiflow starting"
    );

    match command.as_str() {
        "add-word" => {
            let id = arg(rest, 0, "word id")?;
            let lemma = arg(rest, 1, "lemma")?;
            let lang = rest.get(2).map(String::as_str).unwrap_or("en");
            let words = storage.words();
            words.insert_word(id, lemma, lang)?;
            print_json(&words.get_word(id)?)
        }
        "add-sense" => {
            let id = arg(rest, 0, "sense id")?;
            let word_id = arg(rest, 1, "word id")?;
            let pos = arg(rest, 2, "part of speech")?;
            let gloss = arg(rest, 3, "gloss")?;
            let order = match rest.get(4) {
                Some(raw) => raw
                    .parse::<i32>()
                    .map_err(|_| CliError::Usage(format!("invalid sense order: {raw}")))?,
                None => 0,
            };
            let words = storage.words();
            words.insert_sense(id, word_id, pos, gloss, order)?;
            print_json(&words.get_sense(id)?)
        }
        "next" => {
            let limit = match rest.first() {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| CliError::Usage(format!("invalid limit: {raw}")))?,
                None => config.review_batch_size,
            };
            let scheduler = ReviewScheduler::new(&storage).with_new_order(config.new_card_order);
            let batch = scheduler.next_batch(limit, Utc::now())?;
            print_json(&group_by_word(&batch))
        }
        "review" => {
            let sense_id = arg(rest, 0, "sense id")?;
            let rating: Rating = arg(rest, 1, "rating")?.parse()?;
            let duration_ms = match rest.get(2) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| CliError::Usage(format!("invalid duration: {raw}")))?,
                None => 0,
            };
            review(&storage, provider, sense_id, rating, duration_ms)
        }
        "study" => {
            let limit = match rest.first() {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| CliError::Usage(format!("invalid limit: {raw}")))?,
                None => config.review_batch_size,
            };
            study(&storage, provider, config, limit)
        }
        "heatmap" => {
            let metric = match rest.first() {
                Some(raw) => raw.parse::<HeatmapMetric>().map_err(CliError::Usage)?,
                None => config.heatmap_metric,
            };
            let stats = storage.daily_stats(provider);
            let report = analytics::load_report(&stats, metric, Utc::now().date_naive())?;
            print_json(&report)
        }
        "migrations" => {
            let conn = storage.get_connection()?;
            let history = migrations::get_migration_history(&conn)?;
            print_json(&history)
        }
        other => Err(CliError::Usage(format!("unknown command: {other}"))),
    }
}

fn review(
    storage: &Storage,
    provider: Arc<dyn PlatformProvider>,
    sense_id: &str,
    rating: Rating,
    duration_ms: i64,
) -> Result<(), CliError> {
    let now = Utc::now();
    let scheduler = ReviewScheduler::new(storage);
    let recorded = scheduler.record_review(sense_id, rating, duration_ms, now)?;
    record_daily_activity(storage, provider, &recorded)?;

    print_json(&recorded)
}

/// Walks one batch, reading a rating per sense from stdin. Review durations
/// come from the effective-time tracker, so pauses between answers are not
/// counted as study time.
fn study(
    storage: &Storage,
    provider: Arc<dyn PlatformProvider>,
    config: &Config,
    limit: usize,
) -> Result<(), CliError> {
    let scheduler = ReviewScheduler::new(storage).with_new_order(config.new_card_order);
    let batch = scheduler.next_batch(limit, Utc::now())?;
    let words = storage.words();

    let mut tracker = TimeTracker::started_at(Utc::now());
    let mut recorded = Vec::with_capacity(batch.len());
    let mut lines = io::stdin().lock().lines();

    for candidate in &batch {
        let gloss = words
            .get_sense(&candidate.sense_id)?
            .map(|sense| sense.gloss)
            .unwrap_or_default();
        eprint!("{} ({}) [again/hard/good, q to stop]: ", candidate.sense_id, gloss);
        io::stderr().flush()?;

        let rating = loop {
            let Some(line) = lines.next().transpose()? else {
                return print_json(&recorded);
            };
            let line = line.trim();
            if line == "q" {
                return print_json(&recorded);
            }
            match line.parse::<Rating>() {
                Ok(rating) => break rating,
                Err(e) => eprint!("{e}, try again: "),
            }
        };

        let review =
            scheduler.record_timed_review(&candidate.sense_id, rating, &mut tracker, Utc::now())?;
        record_daily_activity(storage, Arc::clone(&provider), &review)?;
        recorded.push(review);
    }

    print_json(&recorded)
}

fn record_daily_activity(
    storage: &Storage,
    provider: Arc<dyn PlatformProvider>,
    recorded: &RecordedReview,
) -> Result<(), CliError> {
    let focus_seconds = u32::try_from(recorded.duration_ms / 1000).unwrap_or(u32::MAX);
    storage.daily_stats(provider).record_activity(
        recorded.state.last_review_at.date_naive(),
        focus_seconds,
        u32::from(recorded.first_exposure),
        1,
    )?;
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, CliError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| CliError::Usage(format!("missing argument: {name}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
