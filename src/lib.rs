pub mod config;
pub mod logging;
pub mod platform;
pub mod services;
pub mod storage;

pub use config::{Config, ConfigError};
pub use platform::{EphemeralPlatform, NativePlatform, PlatformError, PlatformProvider};
pub use services::{
    HeatmapDay, HeatmapMetric, HeatmapReport, MemoryState, NewCardOrder, Rating, RecordedReview,
    ReviewCandidate, ReviewError, ReviewScheduler, TimeTracker,
};
pub use storage::{Storage, StorageError, StorageResult};
