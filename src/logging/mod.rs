//! Logging for registration runs
//!
//! Console and JSON-file output through `tracing`, run/stage spans and stage
//! timing metrics.

pub mod config;
pub mod metrics;
pub mod spans;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use config::LoggingConfig;
pub use metrics::{MetricsCollector, PerformanceMeasurement, PerformanceStats};
pub use spans::{RunSpan, StageSpan};

pub const LOG_FILE_PREFIX: &str = "atlas.log";

/// Keeps the background log writer alive; drop it last.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the logging system with the provided configuration
///
/// `RUST_LOG` takes precedence over the configured levels. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    config.validate().map_err(anyhow::Error::msg)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location);
        layers.push(console_layer.boxed());
    }

    let mut file_guard = None;
    if let Some(ref log_dir) = config.log_directory {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    tracing::debug!(?config, "Logging initialized");
    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoggingConfig {
            global_level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_file_logging_init() {
        let temp_dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            console_output: false,
            log_directory: Some(temp_dir.path().join("logs")),
            ..Default::default()
        };

        // only the first global init in this process can succeed
        if let Ok(guard) = init_logging(&config) {
            tracing::info!("file logging ready");
            drop(guard);
        }
        assert!(temp_dir.path().join("logs").exists());
    }
}
