//! # Kestrel Utilities
//!
//! Shared logging setup for the Kestrel workspace, built on `tracing`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_with, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingConfig, LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
