use std::path::PathBuf;

use thiserror::Error;

use crate::services::analytics::HeatmapMetric;
use crate::services::review_scheduler::NewCardOrder;

const APP_DIR: &str = "lexiflow";
const DB_FILE: &str = "lexiflow.db";
const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the device secret (`LEXIFLOW_DATA_DIR`).
    pub data_dir: PathBuf,
    /// SQLite file (`LEXIFLOW_DB_PATH`), defaults to `<data_dir>/lexiflow.db`.
    pub db_path: PathBuf,
    /// Default `next` batch size (`REVIEW_BATCH_SIZE`).
    pub review_batch_size: usize,
    /// Ordering of never-reviewed senses (`NEW_CARD_ORDER`, `NEW_CARD_SEED`).
    pub new_card_order: NewCardOrder,
    /// Default heatmap metric (`HEATMAP_METRIC`).
    pub heatmap_metric: HeatmapMetric,
    /// `EnvFilter` directive (`RUST_LOG`).
    pub log_level: String,
    /// Keep everything in memory; nothing touches disk.
    pub ephemeral: bool,
    /// Values that could not be parsed and were replaced by defaults.
    ///
    /// Collected rather than logged because configuration is read before
    /// the subscriber exists; see [`Config::log_warnings`].
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join(DB_FILE),
            data_dir,
            review_batch_size: DEFAULT_BATCH_SIZE,
            new_card_order: NewCardOrder::Catalog,
            heatmap_metric: HeatmapMetric::Words,
            log_level: "info".to_string(),
            ephemeral: false,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to defaults and are recorded in
    /// [`Config::warnings`]; only a zero batch size is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut warnings = Vec::new();

        let data_dir = lookup("LEXIFLOW_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let db_path = lookup("LEXIFLOW_DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DB_FILE));

        let review_batch_size = match lookup("REVIEW_BATCH_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: "REVIEW_BATCH_SIZE",
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Ok(n) => n,
                Err(e) => {
                    warnings.push(format!(
                        "invalid REVIEW_BATCH_SIZE {raw:?} ({e}), using {DEFAULT_BATCH_SIZE}"
                    ));
                    DEFAULT_BATCH_SIZE
                }
            },
            None => DEFAULT_BATCH_SIZE,
        };

        let seed = match lookup("NEW_CARD_SEED") {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
                warnings.push(format!("invalid NEW_CARD_SEED {raw:?} ({e}), using 0"));
                0
            }),
            None => 0,
        };

        let new_card_order = match lookup("NEW_CARD_ORDER").as_deref().map(str::trim) {
            None | Some("") | Some("catalog") => NewCardOrder::Catalog,
            Some("shuffled") => NewCardOrder::Shuffled { seed },
            Some(other) => {
                warnings.push(format!("unknown NEW_CARD_ORDER {other:?}, using catalog"));
                NewCardOrder::Catalog
            }
        };

        let heatmap_metric = match lookup("HEATMAP_METRIC") {
            Some(raw) => raw.parse::<HeatmapMetric>().unwrap_or_else(|e| {
                warnings.push(format!("{e}, using {}", HeatmapMetric::default()));
                HeatmapMetric::default()
            }),
            None => HeatmapMetric::default(),
        };

        let log_level = lookup("RUST_LOG").unwrap_or(defaults.log_level);

        let ephemeral = lookup("LEXIFLOW_EPHEMERAL")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            data_dir,
            db_path,
            review_batch_size,
            new_card_order,
            heatmap_metric,
            log_level,
            ephemeral,
            warnings,
        })
    }

    /// Emits the collected fallback notices. Call once tracing is installed.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.review_batch_size, 3);
        assert_eq!(config.new_card_order, NewCardOrder::Catalog);
        assert_eq!(config.heatmap_metric, HeatmapMetric::Words);
        assert_eq!(config.log_level, "info");
        assert!(!config.ephemeral);
        assert!(config.db_path.ends_with("lexiflow/lexiflow.db"));
    }

    #[test]
    fn test_db_path_follows_data_dir() {
        let config = config_from(&[("LEXIFLOW_DATA_DIR", "/tmp/lf")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/lf/lexiflow.db"));

        let config = config_from(&[
            ("LEXIFLOW_DATA_DIR", "/tmp/lf"),
            ("LEXIFLOW_DB_PATH", "/var/db/x.db"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/db/x.db"));
    }

    #[test]
    fn test_shuffled_order_with_seed() {
        let config = config_from(&[("NEW_CARD_ORDER", "shuffled"), ("NEW_CARD_SEED", "42")]).unwrap();
        assert_eq!(config.new_card_order, NewCardOrder::Shuffled { seed: 42 });
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("REVIEW_BATCH_SIZE", "many"),
            ("NEW_CARD_ORDER", "random"),
            ("HEATMAP_METRIC", "calories"),
        ])
        .unwrap();
        assert_eq!(config.review_batch_size, 3);
        assert_eq!(config.new_card_order, NewCardOrder::Catalog);
        assert_eq!(config.heatmap_metric, HeatmapMetric::Words);

        assert_eq!(config.warnings.len(), 3);
        assert!(config.warnings[0].contains("REVIEW_BATCH_SIZE"));
        assert!(config.warnings[1].contains("NEW_CARD_ORDER"));
        assert!(config.warnings[2].contains("calories"));
    }

    #[test]
    fn test_valid_values_produce_no_warnings() {
        let config = config_from(&[
            ("REVIEW_BATCH_SIZE", "10"),
            ("NEW_CARD_ORDER", "shuffled"),
            ("NEW_CARD_SEED", "9"),
            ("HEATMAP_METRIC", "time"),
        ])
        .unwrap();
        assert!(config.warnings.is_empty());
        assert!(config_from(&[("NEW_CARD_SEED", "-1")]).unwrap().warnings[0].contains("NEW_CARD_SEED"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = config_from(&[("REVIEW_BATCH_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REVIEW_BATCH_SIZE", .. }));
    }

    #[test]
    fn test_ephemeral_flag() {
        assert!(config_from(&[("LEXIFLOW_EPHEMERAL", "1")]).unwrap().ephemeral);
        assert!(config_from(&[("HEATMAP_METRIC", "time")]).is_ok());
    }
}
