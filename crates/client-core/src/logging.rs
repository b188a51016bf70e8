//! Logging setup for harness binaries and tests

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ClientError, ClientResult};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span enter/exit
    pub log_spans: bool,
    /// Write to the test harness' captured output instead of stdout
    pub test_writer: bool,
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            file_info: false,
            log_spans: false,
            test_writer: false,
            app_name: "tfm".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Debug level, captured by the test harness.
    pub fn for_tests() -> Self {
        LoggingConfig {
            level: Level::DEBUG,
            test_writer: true,
            ..Default::default()
        }
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Installs the global subscriber. `RUST_LOG` directives are honoured on top
/// of `config.level`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn setup_logging(config: LoggingConfig) -> ClientResult<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::from_default_env().add_directive(config.level.into());
    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.test_writer {
        builder.with_test_writer().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ClientError::Config(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!("Logging ready for {}", config.app_name);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> ClientResult<Level> {
    Level::from_str(level).map_err(|_| ClientError::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn second_setup_is_a_no_op() {
        assert!(setup_logging(LoggingConfig::for_tests()).is_ok());
        assert!(setup_logging(LoggingConfig::new(Level::TRACE, "again")).is_ok());
    }

    #[test]
    fn parses_levels() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert!(matches!(parse_log_level("loud"), Err(ClientError::Config(_))));
    }
}
