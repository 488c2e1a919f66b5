pub mod analytics;
pub mod fsrs;
pub mod heatmap;
pub mod review_scheduler;
pub mod time_tracker;

pub use analytics::{HeatmapMetric, HeatmapReport, HeatmapSummary};
pub use fsrs::{MemoryState, Rating};
pub use heatmap::{compute_levels, DailyValue, HeatmapDay, Thresholds};
pub use review_scheduler::{
    NewCardOrder, RecordedReview, ReviewCandidate, ReviewError, ReviewLogEntry, ReviewScheduler,
    ReviewStore, ReviewWriter,
};
pub use time_tracker::TimeTracker;
