use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;
const TARGET_RETENTION: f64 = 0.9;

pub const MIN_STABILITY: f64 = 0.1;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Calibrated FSRS v4 weights for the three-button variant.
///
/// These are opaque constants; address them through the role-named indices
/// below rather than by position.
pub const WEIGHTS: [f64; 17] = [
    0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability
    4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
    0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
    1.26, 0.29, 2.61, // w14-w16
];

/// w0..w2 are indexed directly by the rating ordinal on first exposure.
pub const W_INIT_STABILITY: usize = 0;
pub const W_INIT_DIFFICULTY: usize = 4;
pub const W_INIT_DIFFICULTY_SLOPE: usize = 5;
pub const W_DIFFICULTY_STEP: usize = 6;
pub const W_RECALL_GROWTH: usize = 8;
pub const W_RECALL_STABILITY_DECAY: usize = 9;
pub const W_RECALL_RETRIEVABILITY_GAIN: usize = 10;
pub const W_LAPSE_SCALE: usize = 11;
pub const W_LAPSE_DIFFICULTY_EXP: usize = 12;
pub const W_LAPSE_STABILITY_EXP: usize = 13;
pub const W_LAPSE_RETRIEVABILITY_GAIN: usize = 14;
pub const W_HARD_PENALTY: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again = 0,
    Hard = 1,
    Good = 2,
}

impl Rating {
    pub const ALL: [Rating; 3] = [Rating::Again, Rating::Hard, Rating::Good];

    pub fn value(self) -> i64 {
        self as i64
    }

    /// Offset from GOOD used by the difficulty formulas.
    fn delta(self) -> f64 {
        (self.value() - 2) as f64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rating: {0}")]
pub struct ParseRatingError(pub String);

impl TryFrom<i64> for Rating {
    type Error = ParseRatingError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Again),
            1 => Ok(Self::Hard),
            2 => Ok(Self::Good),
            other => Err(ParseRatingError(other.to_string())),
        }
    }
}

impl FromStr for Rating {
    type Err = ParseRatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "again" => Ok(Self::Again),
            "1" | "hard" => Ok(Self::Hard),
            "2" | "good" => Ok(Self::Good),
            _ => Err(ParseRatingError(s.to_string())),
        }
    }
}

/// Memory state of a single sense after its most recent review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryState {
    /// Days until recall probability falls to 0.9; at least `MIN_STABILITY`.
    pub stability: f64,
    /// In `[MIN_DIFFICULTY, MAX_DIFFICULTY]`.
    pub difficulty: f64,
    /// Number of AGAIN ratings, first exposure included.
    pub lapses: u32,
    pub due: DateTime<Utc>,
    pub last_review_at: DateTime<Utc>,
}

impl MemoryState {
    /// Whether the sense belongs in the due pool at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}

/// Probability of recall after `elapsed_days` for a memory of the given
/// stability. Equals 0.9 exactly when `elapsed_days == stability`.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    let s = sanitize_stability(stability);
    let t = if elapsed_days.is_nan() {
        0.0
    } else {
        elapsed_days.max(0.0)
    };
    (TARGET_RETENTION.ln() * t / s).exp()
}

/// Computes the state that replaces `previous` after a review rated `rating`
/// at `now`. A missing previous state means first exposure.
pub fn next_state(rating: Rating, previous: Option<&MemoryState>, now: DateTime<Utc>) -> MemoryState {
    let w = &WEIGHTS;

    let Some(prev) = previous else {
        let stability = initial_stability(w, rating);
        return MemoryState {
            stability,
            difficulty: initial_difficulty(w, rating),
            lapses: if rating == Rating::Again { 1 } else { 0 },
            due: add_days(now, stability),
            last_review_at: now,
        };
    };

    let stability = sanitize_stability(prev.stability);
    let difficulty = sanitize_difficulty(prev.difficulty);
    let elapsed = elapsed_days(prev.last_review_at, now);
    let r = retrievability(stability, elapsed);

    let new_difficulty = next_difficulty(w, difficulty, rating);
    let new_stability = if rating == Rating::Again {
        next_forget_stability(w, difficulty, stability, r)
    } else {
        next_recall_stability(w, new_difficulty, stability, r, rating)
    };

    MemoryState {
        stability: new_stability,
        difficulty: new_difficulty,
        lapses: prev
            .lapses
            .saturating_add(if rating == Rating::Again { 1 } else { 0 }),
        due: add_days(now, new_stability),
        last_review_at: now,
    }
}

pub fn elapsed_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = now
        .timestamp_millis()
        .saturating_sub(since.timestamp_millis());
    (ms as f64 / MS_PER_DAY).max(0.0)
}

pub fn clamp_difficulty(d: f64) -> f64 {
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn sanitize_stability(s: f64) -> f64 {
    if s.is_nan() {
        MIN_STABILITY
    } else {
        s.max(MIN_STABILITY)
    }
}

fn sanitize_difficulty(d: f64) -> f64 {
    if d.is_nan() {
        clamp_difficulty(WEIGHTS[W_INIT_DIFFICULTY])
    } else {
        clamp_difficulty(d)
    }
}

fn initial_stability(w: &[f64; 17], rating: Rating) -> f64 {
    w[W_INIT_STABILITY + rating.value() as usize].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; 17], rating: Rating) -> f64 {
    clamp_difficulty(w[W_INIT_DIFFICULTY] - w[W_INIT_DIFFICULTY_SLOPE] * rating.delta())
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: Rating) -> f64 {
    clamp_difficulty(d - w[W_DIFFICULTY_STEP] * rating.delta())
}

fn next_recall_stability(w: &[f64; 17], next_d: f64, s: f64, r: f64, rating: Rating) -> f64 {
    let hard_penalty = if rating == Rating::Hard {
        w[W_HARD_PENALTY]
    } else {
        1.0
    };

    let new_s = s
        * (1.0
            + w[W_RECALL_GROWTH].exp()
                * (11.0 - next_d)
                * s.powf(-w[W_RECALL_STABILITY_DECAY])
                * (((1.0 - r) * w[W_RECALL_RETRIEVABILITY_GAIN]).exp() - 1.0)
                * hard_penalty);
    sanitize_stability(new_s)
}

fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let new_s = w[W_LAPSE_SCALE]
        * d.powf(-w[W_LAPSE_DIFFICULTY_EXP])
        * s.powf(w[W_LAPSE_STABILITY_EXP])
        * ((1.0 - r) * w[W_LAPSE_RETRIEVABILITY_GAIN]).exp();
    sanitize_stability(new_s)
}

/// `now + days`, saturating at the largest representable instant.
fn add_days(now: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    let interval = days * MS_PER_DAY;
    let interval_ms = if interval >= i64::MAX as f64 {
        i64::MAX
    } else {
        interval as i64
    };
    DateTime::from_timestamp_millis(now.timestamp_millis().saturating_add(interval_ms))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
