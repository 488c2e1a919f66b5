//! Heatmap assembly for the analytics screen: metric selection, calendar
//! padding and the headline counters shown next to the grid.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::services::heatmap::{compute_levels, DailyValue, HeatmapDay};
use crate::storage::{DailyStats, DailyStatsRepository, StorageResult};

/// Width of the calendar grid, today included.
pub const HEATMAP_DAYS: u64 = 365;

/// Which daily counter drives the heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapMetric {
    #[default]
    /// Senses learned for the first time.
    Words,
    /// Focus time in whole minutes.
    Time,
}

impl HeatmapMetric {
    /// The counter of `stats` this metric plots.
    pub fn value_of(self, stats: &DailyStats) -> u32 {
        match self {
            Self::Words => stats.new_learned_words,
            Self::Time => stats.focus_seconds / 60,
        }
    }
}

impl fmt::Display for HeatmapMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Words => f.write_str("words"),
            Self::Time => f.write_str("time"),
        }
    }
}

impl FromStr for HeatmapMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "words" => Ok(Self::Words),
            "time" => Ok(Self::Time),
            other => Err(format!("unknown heatmap metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapSummary {
    /// Days in the grid with a non-zero level.
    pub total_study_days: usize,
    /// Consecutive active days ending today.
    pub current_streak: usize,
    /// Focus time over every verified row, regardless of metric.
    pub total_study_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapReport {
    pub metric: HeatmapMetric,
    pub days: Vec<HeatmapDay>,
    pub summary: HeatmapSummary,
}

/// The 365 consecutive days ending at `today`, zero-filled where `values`
/// has no entry. Values outside the window are ignored.
pub fn pad_year(values: &[DailyValue], today: NaiveDate) -> Vec<DailyValue> {
    let by_date: HashMap<NaiveDate, u32> = values.iter().map(|d| (d.date, d.value)).collect();
    let start = today
        .checked_sub_days(Days::new(HEATMAP_DAYS - 1))
        .unwrap_or(NaiveDate::MIN);

    start
        .iter_days()
        .take_while(|date| *date <= today)
        .map(|date| DailyValue::new(date, by_date.get(&date).copied().unwrap_or(0)))
        .collect()
}

/// Length of the run of active days at the end of `days`.
pub fn current_streak(days: &[HeatmapDay]) -> usize {
    days.iter().rev().take_while(|d| d.level > 0).count()
}

pub fn summarize(days: &[HeatmapDay], stats: &[DailyStats]) -> HeatmapSummary {
    HeatmapSummary {
        total_study_days: days.iter().filter(|d| d.level > 0).count(),
        current_streak: current_streak(days),
        total_study_seconds: stats.iter().map(|s| s.focus_seconds as u64).sum(),
    }
}

/// Pads `stats` to a year ending at `today` and bins it.
pub fn build_report(stats: &[DailyStats], metric: HeatmapMetric, today: NaiveDate) -> HeatmapReport {
    let values: Vec<DailyValue> = stats
        .iter()
        .map(|s| DailyValue::new(s.date, metric.value_of(s)))
        .collect();
    let days = compute_levels(&pad_year(&values, today));
    let summary = summarize(&days, stats);

    HeatmapReport {
        metric,
        days,
        summary,
    }
}

/// Report over the verified rows of the daily stats table.
pub fn load_report(
    repo: &DailyStatsRepository,
    metric: HeatmapMetric,
    today: NaiveDate,
) -> StorageResult<HeatmapReport> {
    let stats = repo.all_verified()?;
    tracing::debug!(rows = stats.len(), %metric, "building heatmap");
    Ok(build_report(&stats, metric, today))
}
