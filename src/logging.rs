use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "lexiflow.log";

/// Keeps the background file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

pub fn log_dir() -> String {
    std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string())
}

/// Installs the global subscriber. Stdout goes to stderr so command output
/// on stdout stays machine-readable.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    if file_logging_enabled() {
        let log_dir = log_dir();
        if let Err(err) = std::fs::create_dir_all(&log_dir) {
            eprintln!("failed to create log directory {log_dir}: {err}");
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();

            return Some(FileLogGuard { _guard: guard });
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();

    None
}
