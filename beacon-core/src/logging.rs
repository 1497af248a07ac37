//! Logging infrastructure for beacon
//!
//! Logs are written to `~/.local/state/beacon/` following XDG standards, one
//! file per day named `beacon.YYYY-MM-DD.log`.
//! Telemetry failures are never surfaced to callers, so the log is the only
//! place dropped events and failed flushes show up.

use crate::config::{Config, LoggingConfig};
use crate::error::Error;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory
/// - Daily rotation, keeping at most `max_files` files
/// - Configurable log level via config or RUST_LOG env var
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = log_dir();
    let file_appender = appender(&log_dir, config.max_files)?;

    // Non-blocking writer so logging never stalls a flush
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Build the filter from config or env var
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // File layer - structured logging with timestamps
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Daily-rotating appender writing `beacon.YYYY-MM-DD.log` under `dir`
fn appender(dir: &Path, max_files: usize) -> crate::error::Result<RollingFileAppender> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("beacon")
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Directory holding the daily log files
pub fn log_dir() -> PathBuf {
    Config::state_dir()
}
