//! # Debug session configuration
//!
//! Tunables for a debug session: how long a trap wait may block and what the
//! debug worker thread is called.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use kestrel_core::config::DebugConfig;
//!
//! let config = DebugConfig::new().with_wait_timeout(Duration::from_secs(5));
//! assert_eq!(config.wait_timeout(), Some(Duration::from_secs(5)));
//! ```

use std::env;
use std::time::Duration;

use crate::error::{DebuggerError, Result};

/// Environment variable holding the trap-wait timeout in milliseconds
pub const WAIT_TIMEOUT_ENV: &str = "KESTREL_WAIT_TIMEOUT_MS";

const DEFAULT_WORKER_NAME: &str = "kestrel-debug";

/// Configuration for a debug session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugConfig
{
    wait_timeout: Option<Duration>,
    worker_name: String,
}

impl DebugConfig
{
    /// Unbounded waits and the default worker name
    pub fn new() -> Self
    {
        Self {
            wait_timeout: None,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    /// Build a configuration from the environment
    ///
    /// Reads `KESTREL_WAIT_TIMEOUT_MS`. Unset or empty means "wait forever";
    /// `0` also means "wait forever".
    ///
    /// ## Errors
    ///
    /// Returns `InvalidArgument` if the variable is set but is not an integer.
    pub fn from_env() -> Result<Self>
    {
        let mut config = Self::new();
        if let Ok(raw) = env::var(WAIT_TIMEOUT_ENV) {
            config.wait_timeout = parse_timeout_ms(&raw)?;
        }
        Ok(config)
    }

    /// Bound every trap wait by `timeout`
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self
    {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Wait for traps without a bound
    #[must_use]
    pub fn without_wait_timeout(mut self) -> Self
    {
        self.wait_timeout = None;
        self
    }

    /// Name the debug worker thread
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self
    {
        self.worker_name = name.into();
        self
    }

    /// Configured trap-wait bound, `None` for unbounded
    pub fn wait_timeout(&self) -> Option<Duration>
    {
        self.wait_timeout
    }

    /// Name given to the debug worker thread
    pub fn worker_name(&self) -> &str
    {
        &self.worker_name
    }
}

impl Default for DebugConfig
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn parse_timeout_ms(raw: &str) -> Result<Option<Duration>>
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let millis: u64 = trimmed.parse().map_err(|_| {
        DebuggerError::InvalidArgument(format!("{WAIT_TIMEOUT_ENV} must be a number of milliseconds, got '{raw}'"))
    })?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}
