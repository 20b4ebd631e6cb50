//! Process logging.
//!
//! One global subscriber with two sinks: a compact stdout layer and a
//! rolling file under the log directory (retention capped by file
//! count). The level filter sits behind a reload handle so the
//! operator `loglevel` command can change it at runtime without
//! rebuilding the subscriber.

use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

use crate::error::{Error, Result};

/// Rotated log files kept on disk.
pub const MAX_LOG_FILES: usize = 10;

/// Environment variables that override the configured level, in
/// precedence order.
pub const LEVEL_ENV_VARS: [&str; 2] = ["CMS_LOG_LEVEL", "LOG_LEVEL"];

type FilterHandle = reload::Handle<LevelFilter, Registry>;

/// Logging setup options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level name (DEBUG, INFO, WARNING, ERROR, CRITICAL, TRACE).
    pub level: String,
    /// Directory for rotated log files.
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            dir: PathBuf::from("logs"),
        }
    }
}

impl LogConfig {
    /// Config with the given level and log directory.
    pub fn new(level: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        Self {
            level: level.into(),
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

/// Handle for runtime log-level changes.
///
/// A no-op controller exists for tests and embedded use where no
/// global subscriber was installed.
#[derive(Clone, Default)]
pub struct LogController {
    handle: Option<FilterHandle>,
}

impl LogController {
    /// Controller that accepts level changes and discards them.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Change the active level filter.
    pub fn set_level(&self, name: &str) -> Result<()> {
        let level = parse_level(name)
            .ok_or_else(|| Error::Command(format!("invalid log level: {name}")))?;
        if let Some(handle) = &self.handle {
            handle
                .modify(|filter| *filter = level)
                .map_err(|e| Error::Logging(format!("level reload failed: {e}")))?;
        }
        tracing::info!("log level changed to {level}");
        Ok(())
    }
}

impl std::fmt::Debug for LogController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogController")
            .field("active", &self.handle.is_some())
            .finish()
    }
}

/// Map operator level names onto tracing filters.
///
/// WARNING and CRITICAL come from the original operator vocabulary and
/// map onto WARN and ERROR.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Some(LevelFilter::ERROR),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// The effective level: environment overrides beat the configured one.
pub fn resolve_level(configured: &str) -> String {
    for var in LEVEL_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    configured.to_string()
}

/// Install the global subscriber: stdout plus a daily-rolling file in
/// `config.dir`, both gated by one reloadable level filter.
///
/// Returns the controller for runtime level changes. Fails when a
/// global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<LogController> {
    let level = resolve_level(&config.level);
    let filter = parse_level(&level)
        .ok_or_else(|| Error::Config(format!("invalid logging level: {level}")))?;

    let (filter_layer, handle) = reload::Layer::new(filter);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("servers")
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(&config.dir)
        .map_err(|e| Error::Logging(format!("log file appender: {e}")))?;

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(false);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(format!("subscriber install failed: {e}")))?;

    Ok(LogController {
        handle: Some(handle),
    })
}
