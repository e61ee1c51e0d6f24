//! # Structured Logging
//!
//! Every log line is emitted twice: as JSON into the rotated daemon log
//! file under `<root>/logs/`, and into the in-process log hub backing the
//! control API's `/api/logs` event stream. When no log directory is
//! configured (foreground runs, tests), lines go to stderr instead of a
//! file.

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::LogHub;
use crate::errors::{Error, Result};

/// Rotated log files kept on disk.
const MAX_LOG_FILES: usize = 5;

static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// How the logger is initialised.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level (trace, debug, info, warn, error).
    pub level: String,
    /// Directory for rotated JSON log files; stderr when `None`.
    pub dir: Option<PathBuf>,
}

/// Initialize global logging. Safe to call more than once; only the first
/// call installs a subscriber. The returned guard must be kept alive for
/// the process lifetime so buffered lines reach the file on shutdown.
pub fn init_logging(config: &LoggingConfig, hub: &LogHub) -> Result<Option<WorkerGuard>> {
    let env_filter = parse_env_filter(&config.level)?;

    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(None);
    }

    let hub_layer = fmt::layer().json().flatten_event(true).with_writer(hub.clone());
    let registry = tracing_subscriber::registry().with(env_filter).with(hub_layer);

    let guard = if let Some(dir) = &config.dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("creating log directory {}: {}", dir.display(), e)))?;

        let appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("hatch")
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(dir)
            .map_err(|e| Error::config(format!("creating log appender: {}", e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = fmt::layer().json().flatten_event(true).with_writer(writer);
        registry
            .with(file_layer)
            .try_init()
            .map_err(|e| Error::config(format!("failed to initialize logging: {}", e)))?;
        Some(guard)
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr);
        registry
            .with(stderr_layer)
            .try_init()
            .map_err(|e| Error::config(format!("failed to initialize logging: {}", e)))?;
        None
    };

    let _ = LOGGING_INITIALIZED.set(());
    Ok(guard)
}

fn parse_env_filter(level: &str) -> Result<EnvFilter> {
    let normalized = level.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(Error::config(format!(
                "invalid log level '{}': must be one of trace, debug, info, warn, error",
                level
            )));
        }
    }

    EnvFilter::try_new(normalized)
        .map_err(|e| Error::config(format!("invalid log level '{}': {}", level, e)))
}
