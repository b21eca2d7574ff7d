//! Logging configuration
//!
//! Log levels per component, output destinations and presets.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Level for the scheduler, averager and applier
    pub pipeline_level: String,

    /// Level for registration primitives
    pub algorithm_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            pipeline_level: "info".to_string(),
            algorithm_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for local runs
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            pipeline_level: "debug".to_string(),
            algorithm_level: "trace".to_string(),
        }
    }

    /// Quiet configuration for batch runs
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: false,
            pipeline_level: "info".to_string(),
            algorithm_level: "warn".to_string(),
        }
    }

    /// Map a `-v` count onto a level, starting from the configured one.
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let level = match verbose {
            0 => return self,
            1 => "debug",
            _ => "trace",
        };
        self.global_level = level.to_string();
        self.pipeline_level = level.to_string();
        self.algorithm_level = level.to_string();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("pipeline_level", &self.pipeline_level),
            ("algorithm_level", &self.algorithm_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Effective level for a component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "pipeline" => &self.pipeline_level,
            "algorithms" | "algorithm" => &self.algorithm_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directive string for this configuration.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::pipeline={},{krate}::algorithms={}",
            self.global_level, self.pipeline_level, self.algorithm_level
        )
    }
}
