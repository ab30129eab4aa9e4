//! Centralized logging configuration for Filament hosts
//!
//! The engine itself only emits `tracing` events; binaries embedding it call
//! [`init`] once to install a subscriber with consistent behavior.
//!
//! # Usage
//!
//! ```rust,ignore
//! use filament_logging::{init, LogConfig, LogOutput};
//!
//! // Simple initialization with defaults
//! init(LogConfig::default());
//!
//! // Verbose, to stderr
//! init(LogConfig::new().debug(true).output(LogOutput::Stderr));
//! ```
//!
//! # Re-exports
//!
//! Commonly used tracing macros are re-exported so hosts take one
//! dependency: `trace!`, `debug!`, `info!`, `warn!`, `error!`.

use tracing_subscriber::{fmt, EnvFilter};

// Re-export tracing macros for standardized imports
pub use tracing::{debug, error, info, trace, warn, Level};

/// Output destination for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// Write logs to stdout (default)
    #[default]
    Stdout,
    /// Write logs to stderr
    Stderr,
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable debug-level logging (overrides `default_level`)
    pub debug: bool,
    /// Default log level when RUST_LOG is not set
    pub default_level: String,
    /// Output destination
    pub output: LogOutput,
    /// Show module target in log output
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            debug: false,
            default_level: "info".to_string(),
            output: LogOutput::Stdout,
            show_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn show_target(mut self, show_target: bool) -> Self {
        self.show_target = show_target;
        self
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: LogConfig) {
    let default_directive = if config.debug {
        "debug"
    } else {
        config.default_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.show_target);
    let result = match config.output {
        LogOutput::Stdout => builder.try_init(),
        LogOutput::Stderr => builder.with_writer(std::io::stderr).try_init(),
    };
    // a subscriber installed by the host wins; nothing to do here
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = LogConfig::new()
            .debug(true)
            .output(LogOutput::Stderr)
            .show_target(false);
        assert!(config.debug);
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(!config.show_target);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(LogConfig::default());
        init(LogConfig::new().debug(true));
    }
}
