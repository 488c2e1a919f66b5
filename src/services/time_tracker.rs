use chrono::{DateTime, Utc};

/// Gaps at or above this are treated as idle and not counted.
pub const IDLE_GAP_MS: i64 = 30_000;

/// Accumulates the time a learner is actively interacting with a session.
#[derive(Debug, Clone, Default)]
pub struct TimeTracker {
    last_interaction: Option<DateTime<Utc>>,
    effective_ms: i64,
}

impl TimeTracker {
    /// Tracker whose clock starts at `now`.
    pub fn started_at(now: DateTime<Utc>) -> Self {
        Self {
            last_interaction: Some(now),
            effective_ms: 0,
        }
    }

    /// Adds the gap since the previous interaction when it is shorter than
    /// [`IDLE_GAP_MS`].
    pub fn on_interaction(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_interaction {
            let gap = (now - last).num_milliseconds();
            if (0..IDLE_GAP_MS).contains(&gap) {
                self.effective_ms = self.effective_ms.saturating_add(gap);
            }
        }
        self.last_interaction = Some(now);
    }

    /// The gap spanning the background period is never counted.
    pub fn on_background(&mut self) {
        self.last_interaction = None;
    }

    /// Restarts the clock without counting anything.
    pub fn on_foreground(&mut self, now: DateTime<Utc>) {
        self.last_interaction = Some(now);
    }

    pub fn effective_time_ms(&self) -> i64 {
        self.effective_ms
    }

    /// Returns the accumulated time and starts counting from zero.
    pub fn take(&mut self) -> i64 {
        std::mem::take(&mut self.effective_ms)
    }
}
