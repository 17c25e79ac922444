use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{BrelloError, Result};

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level; `RUST_LOG` takes precedence when set
    pub level: Level,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to log span closings with their timings
    pub log_spans: bool,
    /// Output file path (None for stderr)
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            source_location: false,
            log_spans: false,
            file_path: None,
        }
    }
}

impl LogConfig {
    /// `-v` on the command line: debug level with source locations.
    pub fn verbose(verbose: bool) -> Self {
        if verbose {
            Self {
                level: Level::DEBUG,
                source_location: true,
                ..Default::default()
            }
        } else {
            Self::default()
        }
    }
}

/// Initialize logging system
///
/// Only the first call installs a subscriber; later calls return `Ok(())`.
pub fn setup_logging(config: LogConfig) -> Result<()> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| BrelloError::configuration("log_file", format!("Failed to open log file: {}", e)))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(if config.log_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let layer = if config.timestamps {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| BrelloError::configuration("logging", format!("Failed to set global subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_initialization() {
        assert!(setup_logging(LogConfig::default()).is_ok());
        // second call is a no-op
        assert!(setup_logging(LogConfig::verbose(true)).is_ok());

        tracing::info!(model_id = "test", "Logging initialized");
    }

    #[test]
    fn test_verbose_config() {
        let config = LogConfig::verbose(true);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.source_location);
        assert_eq!(LogConfig::verbose(false).level, Level::INFO);
    }
}
