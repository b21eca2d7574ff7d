//! Stage timing collection
//!
//! Records how long each stage of a registration run took and summarises the
//! measurements per operation.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const MAX_MEASUREMENTS: usize = 10_000;

/// Individual performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub run_id: Option<Uuid>,
}

/// Statistical summary of performance measurements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PerformanceStats {
    /// Summarise a set of durations, `None` when empty.
    pub fn from_durations(operation: &str, durations: &[f64]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let mut sorted = durations.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted
            .iter()
            .map(|d| {
                let diff = d - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let percentile = |p: f64| sorted[(((count as f64) * p) as usize).min(count - 1)];

        Some(Self {
            operation: operation.to_string(),
            count,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
        })
    }
}

/// Thread-safe metrics collector, cheap to clone.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    measurements: Arc<Mutex<Vec<PerformanceMeasurement>>>,
    enabled: bool,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(Vec::new())),
            enabled,
        }
    }

    /// Record one stage duration
    pub fn record(&self, operation: &str, duration: Duration, run_id: Option<Uuid>) {
        if !self.enabled {
            return;
        }

        let measurement = PerformanceMeasurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now(),
            run_id,
        };

        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement);
            if measurements.len() > MAX_MEASUREMENTS {
                measurements.drain(0..MAX_MEASUREMENTS / 2);
            }
        }
    }

    /// All measurements for one operation
    pub fn get_measurements(&self, operation: &str) -> Vec<PerformanceMeasurement> {
        self.measurements
            .lock()
            .map(|m| m.iter().filter(|m| m.operation == operation).cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct operation names, in first-seen order
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Ok(measurements) = self.measurements.lock() {
            for m in measurements.iter() {
                if !names.contains(&m.operation) {
                    names.push(m.operation.clone());
                }
            }
        }
        names
    }

    /// Statistics for one operation
    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let durations: Vec<f64> = self
            .get_measurements(operation)
            .iter()
            .map(|m| m.duration_ms)
            .collect();
        PerformanceStats::from_durations(operation, &durations)
    }

    /// Statistics for every recorded operation
    pub fn summary(&self) -> Vec<PerformanceStats> {
        self.operations()
            .iter()
            .filter_map(|op| self.calculate_stats(op))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.measurements.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
