use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::algorithms::ElasticParams;
use crate::analysis::projection::Normalisation;
use crate::logging::LoggingConfig;
use crate::pipeline::pool::available_cores;
use crate::transform::OrthogonalPlane;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schedule: ScheduleConfig,
    pub elastic: ElasticParams,
    pub concurrency: ConcurrencyConfig,
    pub projection: ProjectionConfig,
    pub sampling: SamplingConfig,
    pub logging: LoggingConfig,
}

/// Shape of the iteration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub iterations: usize,
    pub first_plane: OrthogonalPlane,
    /// Register each source against itself as one of the averaged pairs.
    pub include_self_pair: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Upper bound on worker threads; all available cores when unset.
    pub core_budget: Option<usize>,
}

/// Label-guided signal projection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Block edge in calibrated units.
    pub block_size: f64,
    /// Sample window edge, in blocks.
    pub sample_radius: usize,
    pub normalisation: Normalisation,
}

/// Bin sampling for cohort feature tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Bin edge in calibrated units, or voxels for uncalibrated volumes.
    pub bin_size: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { bin_size: 18.0 }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            first_plane: OrthogonalPlane::YZ,
            include_self_pair: true,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            block_size: 10.0,
            sample_radius: 3,
            normalisation: Normalisation::Background,
        }
    }
}

impl ConcurrencyConfig {
    pub fn effective_budget(&self) -> usize {
        self.core_budget.unwrap_or_else(available_cores).max(1)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> anyhow::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.schedule.iterations == 0 {
            errors.push("schedule.iterations must be at least 1".to_string());
        }

        errors.extend(self.elastic.validate());

        if self.concurrency.core_budget == Some(0) {
            errors.push("concurrency.core_budget must be positive".to_string());
        }

        if !(self.projection.block_size.is_finite() && self.projection.block_size > 0.0) {
            errors.push("projection.block_size must be positive".to_string());
        }
        if self.projection.sample_radius == 0 {
            errors.push("projection.sample_radius must be at least 1".to_string());
        }

        if !(self.sampling.bin_size.is_finite() && self.sampling.bin_size > 0.0) {
            errors.push("sampling.bin_size must be positive".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    tracing::warn!(path, "Configuration validation errors:");
                    for error in errors {
                        tracing::warn!("  - {}", error);
                    }
                    tracing::warn!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
