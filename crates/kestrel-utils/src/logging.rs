//! # Logging Utilities
//!
//! Logging infrastructure for Kestrel using `tracing`.
//!
//! Console output goes to stderr: a launched inferior inherits our stdout, and
//! its output must not interleave with log lines. An optional log file gets a
//! second copy of every event, written through a non-blocking appender.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kestrel_utils::init_logging;
//!
//! // Keep the guard alive for as long as you log; dropping it flushes the file.
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Debugger started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g., `RUST_LOG=debug`, `RUST_LOG=kestrel_core=trace`)
//! - `KESTREL_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `KESTREL_LOG_FILE`: optional log file; a directory gets a dated
//!   `YYYY-MM-DD-kestrel.log` inside it

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "KESTREL_LOG_FORMAT";
/// Environment variable naming the log file
pub const LOG_FILE_ENV: &str = "KESTREL_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (every reaped status and debug event)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Where and how to log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig
{
    /// Explicit level; `None` defers to `RUST_LOG`, then `info`
    pub level: Option<LogLevel>,
    /// Output format for both console and file
    pub format: LogFormat,
    /// Log file (or directory for a dated file)
    pub file: Option<PathBuf>,
}

impl LoggingConfig
{
    /// Read `KESTREL_LOG_FORMAT` and `KESTREL_LOG_FILE`
    ///
    /// ## Errors
    ///
    /// `InvalidFormat` if `KESTREL_LOG_FORMAT` is set to an unknown format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var(LOG_FORMAT_ENV) {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().parse()?,
            _ => LogFormat::Pretty,
        };
        let file = env::var_os(LOG_FILE_ENV).filter(|raw| !raw.is_empty()).map(PathBuf::from);
        Ok(Self {
            level: None,
            format,
            file,
        })
    }
}

/// Keeps the file writer alive; dropping it flushes pending lines
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    file: Option<(PathBuf, WorkerGuard)>,
}

impl LogGuard
{
    /// The log file being written, if any
    pub fn file(&self) -> Option<&Path>
    {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }
}

/// Initialize logging from the environment
///
/// ## Errors
///
/// Returns an error if:
/// - `KESTREL_LOG_FORMAT` is invalid
/// - logging is already initialized
/// - the log file cannot be created
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    init_logging_with(&LoggingConfig::from_env()?)
}

/// Initialize logging with an explicit level and format (file from the environment)
///
/// ## Example
///
/// ```rust,no_run
/// use kestrel_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    let mut config = LoggingConfig::from_env().unwrap_or_default();
    config.level = Some(level);
    config.format = format;
    init_logging_with(&config)
}

/// Initialize logging from a full [`LoggingConfig`]
///
/// ## Errors
///
/// `InitializationFailed` if a global subscriber is already set, `FileError`
/// if the log file's directory cannot be created.
pub fn init_logging_with(config: &LoggingConfig) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    let mut guard = LogGuard { file: None };

    if let Some(requested) = &config.file {
        let path = resolve_log_file(requested)?;
        let directory = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, name));
        layers.push(file_layer(config.format, writer));
        guard.file = Some((path, worker));
    }

    Registry::default()
        .with(layers)
        .with(build_filter(config.level))
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Explicit level first, then `RUST_LOG`, then `info`
fn build_filter(level: Option<LogLevel>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn resolve_log_file(requested: &Path) -> Result<PathBuf, LoggingError>
{
    if requested.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        return Ok(requested.join(format!("{today}-kestrel.log")));
    }
    if let Some(parent) = requested.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(requested.to_path_buf())
}

fn console_layer(format: LogFormat) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_layer(format: LogFormat, writer: tracing_appender::non_blocking::NonBlocking) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => layer.with_ansi(false).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Unknown log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Unknown log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn directory_gets_a_dated_file()
    {
        let dir = env::temp_dir();
        let file = resolve_log_file(&dir).unwrap();
        assert_eq!(file.parent(), Some(dir.as_path()));
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-kestrel.log"), "{name}");
    }

    #[test]
    fn explicit_file_is_kept()
    {
        let requested = env::temp_dir().join("kestrel-logging-test").join("session.log");
        assert_eq!(resolve_log_file(&requested).unwrap(), requested);
    }

    #[test]
    fn default_config_is_pretty_console_only()
    {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
        assert!(config.level.is_none());
    }
}
