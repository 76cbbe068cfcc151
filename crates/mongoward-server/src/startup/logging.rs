//! File-based logging setup
//!
//! Console output plus an optional daily-rotated file. Component filtering
//! goes through RUST_LOG as usual; the env knobs below only pick defaults.
//!
//! - MONGOWARD_LOG_DIR: log directory (default /var/log/mongoward)
//! - MONGOWARD_LOG_CONSOLE: console output on/off (default on)
//! - MONGOWARD_LOG_FILE: file output on/off (default off, sidecars usually
//!   log to stdout for the supervisor to collect)
//! - MONGOWARD_LOG_LEVEL: default level when RUST_LOG is unset

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration for the controller
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/var/log/mongoward"),
            console_output: true,
            file_logging: false,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let log_dir = std::env::var("MONGOWARD_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let console_output = std::env::var("MONGOWARD_LOG_CONSOLE")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(defaults.console_output);

        let file_logging = std::env::var("MONGOWARD_LOG_FILE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.file_logging);

        let level = std::env::var("MONGOWARD_LOG_LEVEL").unwrap_or(defaults.level);

        Self {
            log_dir,
            console_output,
            file_logging,
            level,
        }
    }
}

/// Initialize the global subscriber. The returned guard must be held for the
/// life of the process or buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = config.console_output.then(fmt::layer);

    let (file_layer, guard) = if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, "mongoward.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert!(config.console_output);
        assert!(!config.file_logging);
        assert_eq!(config.level, "info");
    }
}
