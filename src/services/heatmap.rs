//! Quantile binning of daily activity into calendar heatmap levels.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Minimum number of active days before percentile thresholds are trusted.
const MIN_QUANTILE_SAMPLES: usize = 4;

/// Highest intensity level; 0 is reserved for days without activity.
pub const MAX_LEVEL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Raw activity figure for one calendar day.
pub struct DailyValue {
    pub date: NaiveDate,
    /// Words learned or minutes studied, depending on the metric.
    pub value: u32,
}

impl DailyValue {
    pub fn new(date: NaiveDate, value: u32) -> Self {
        Self { date, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One display-ready heatmap cell.
pub struct HeatmapDay {
    pub date: NaiveDate,
    /// Intensity in `0..=MAX_LEVEL`; 0 exactly when `raw_value` is 0.
    pub level: u8,
    pub raw_value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Upper bounds of levels 1 to 3 over the positive values of a series.
pub struct Thresholds {
    /// Value at index `n / 4` of the sorted positives.
    pub q1: u32,
    /// Value at index `n / 2`.
    pub q2: u32,
    /// Value at index `n * 3 / 4`.
    pub q3: u32,
}

impl Thresholds {
    /// Thresholds for an ascending slice of strictly positive values.
    pub fn from_sorted(sorted: &[u32]) -> Self {
        let n = sorted.len();
        if n < MIN_QUANTILE_SAMPLES {
            let max = sorted.last().copied().unwrap_or(0) as u64;
            return Self {
                q1: (max / 4) as u32,
                q2: (max / 2) as u32,
                q3: (max * 3 / 4) as u32,
            };
        }

        Self {
            q1: sorted[n / 4],
            q2: sorted[n / 2],
            q3: sorted[n * 3 / 4],
        }
    }

    /// Nearly uniform activity: every active day lands on the same cut.
    pub fn is_collapsed(&self) -> bool {
        self.q1 == self.q3 && self.q1 != 0
    }

    /// Level for `value`; non-decreasing in `value`.
    pub fn level(&self, value: u32) -> u8 {
        if value == 0 {
            return 0;
        }

        if self.is_collapsed() {
            return match value.cmp(&self.q1) {
                std::cmp::Ordering::Less => 1,
                std::cmp::Ordering::Equal => 2,
                std::cmp::Ordering::Greater => MAX_LEVEL,
            };
        }

        if value <= self.q1 {
            1
        } else if value <= self.q2 {
            2
        } else if value <= self.q3 {
            3
        } else {
            MAX_LEVEL
        }
    }
}

/// Thresholds derived from the positive values of a series.
pub fn thresholds_for(values: &[DailyValue]) -> Thresholds {
    let mut positive: Vec<u32> = values.iter().map(|d| d.value).filter(|&v| v > 0).collect();
    positive.sort_unstable();
    Thresholds::from_sorted(&positive)
}

/// Classifies every day of `values`, preserving input order.
pub fn compute_levels(values: &[DailyValue]) -> Vec<HeatmapDay> {
    let thresholds = thresholds_for(values);
    values
        .iter()
        .map(|d| HeatmapDay {
            date: d.date,
            level: thresholds.level(d.value),
            raw_value: d.value,
        })
        .collect()
}
