use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::{Dims, Volume};
use crate::logging::PerformanceStats;
use crate::transform::{OrthogonalPlane, TransformSequence};

/// Timing of one stage of one (iteration, plane) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTime {
    pub stage_name: String,
    pub iteration: Option<usize>,
    pub plane: Option<OrthogonalPlane>,
    pub duration_ms: f64,
}

/// How far each volume moved at one (iteration, plane) step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneSummary {
    pub iteration: usize,
    pub plane: OrthogonalPlane,
    /// Mean coefficient displacement from identity, per volume.
    pub mean_displacement: Vec<f64>,
}

/// Record of a completed registration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub primitive: String,
    pub volume_count: usize,
    pub labels: Vec<String>,
    pub dimensions: Dims,
    pub iterations: usize,
    pub first_plane: OrthogonalPlane,
    pub include_self_pair: bool,
    pub threads: usize,
    pub primitive_calls: usize,
    pub stage_times: Vec<StageTime>,
    pub planes: Vec<PlaneSummary>,
    pub stage_stats: Vec<PerformanceStats>,
    pub total_ms: f64,
}

/// One input volume of a groupwise run.
#[derive(Debug, Clone)]
pub struct CohortMember {
    pub label: String,
    pub volume: Volume,
}

/// One output of a groupwise run.
#[derive(Debug, Clone)]
pub struct RegisteredVolume {
    pub label: String,
    pub volume: Volume,
    pub sequence: TransformSequence,
}

/// Result of [`super::GroupwiseScheduler::run`].
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub members: Vec<RegisteredVolume>,
    pub report: RunReport,
}

impl RegistrationOutcome {
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.members.iter().map(|m| &m.volume)
    }

    pub fn sequences(&self) -> impl Iterator<Item = &TransformSequence> {
        self.members.iter().map(|m| &m.sequence)
    }
}
