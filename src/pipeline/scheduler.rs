//! Groupwise registration loop.
//!
//! A run walks `iterations x 3` steps. Each step reslices every volume into the
//! next orthogonal plane, projects the resliced volumes along z, lets the
//! [`PairwiseAverager`] compute one consensus field per volume, warps every slice
//! of each volume with its field and records the field in that volume's
//! [`TransformSequence`]. The output of one step is the input of the next.
//!
//! Before the loop the volumes are resliced `first_plane.lead_in()` times so the
//! configured plane is visited first; afterwards the complementary number of
//! reslices restores the input orientation.

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::averager::{PairwiseAverager, STAGE_REGISTER};
use super::cohort::Cohort;
use super::pool::{thread_count, WorkerPool};
use super::progress::ProgressReporter;
use super::types::{PlaneSummary, RegisteredVolume, RegistrationOutcome, RunReport, StageTime};
use crate::algorithms::{ElasticParams, RegistrationPrimitive};
use crate::config::{Config, ScheduleConfig};
use crate::data::{Reslicer, Volume};
use crate::error::{RegistrationError, Result};
use crate::logging::{MetricsCollector, PerformanceStats, RunSpan, StageSpan};
use crate::transform::{OrthogonalPlane, TransformSequence};

pub const STAGE_LEAD_IN: &str = "lead-in";
pub const STAGE_RESLICE: &str = "reslice";
pub const STAGE_PROJECT: &str = "project";
pub const STAGE_WARP: &str = "warp";
pub const STAGE_STORE: &str = "store";
pub const STAGE_LEAD_OUT: &str = "lead-out";

struct RunContext {
    run_id: Uuid,
    span: RunSpan,
    stage_times: Vec<StageTime>,
    planes: Vec<PlaneSummary>,
}

/// Drives groupwise registration of a [`Cohort`].
pub struct GroupwiseScheduler {
    primitive: Arc<dyn RegistrationPrimitive>,
    schedule: ScheduleConfig,
    params: ElasticParams,
    core_budget: usize,
    progress: ProgressReporter,
    metrics: MetricsCollector,
}

impl GroupwiseScheduler {
    /// Scheduler for a validated configuration.
    pub fn new(primitive: Arc<dyn RegistrationPrimitive>, config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| RegistrationError::invalid_configuration(errors.join("; ")))?;

        Ok(Self {
            primitive,
            schedule: config.schedule.clone(),
            params: config.elastic.clone(),
            core_budget: config.concurrency.effective_budget(),
            progress: ProgressReporter::disabled(),
            metrics: MetricsCollector::new(true),
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_core_budget(mut self, core_budget: usize) -> Self {
        self.core_budget = core_budget.max(1);
        self
    }

    pub fn core_budget(&self) -> usize {
        self.core_budget
    }

    /// Workers used for a cohort of `volumes`.
    pub fn thread_count(&self, volumes: usize) -> usize {
        thread_count(volumes, self.core_budget)
    }

    /// Register plain volumes, labelled by index.
    pub fn register(&self, volumes: Vec<Volume>) -> Result<RegistrationOutcome> {
        self.run(Cohort::from_volumes(volumes)?)
    }

    /// Register a cohort. Fails without partial output if any stage fails.
    pub fn run(&self, cohort: Cohort) -> Result<RegistrationOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let threads = self.thread_count(cohort.len());

        let mut ctx = RunContext {
            run_id,
            span: RunSpan::new(run_id, cohort.len(), self.schedule.iterations, threads),
            stage_times: Vec::new(),
            planes: Vec::new(),
        };

        tracing::info!(
            parent: ctx.span.span(),
            run_id = %run_id,
            volumes = cohort.len(),
            dims = %cohort.dims(),
            iterations = self.schedule.iterations,
            first_plane = %self.schedule.first_plane,
            primitive = self.primitive.name(),
            threads,
            "Starting groupwise registration"
        );

        let labels = cohort.labels();
        let dims = cohort.dims();
        let result = self.execute(cohort, &mut ctx);
        let calls = result.as_ref().map(|(_, _, calls)| *calls).unwrap_or(0);
        let duration = ctx.span.record_completion(result.is_ok(), calls);

        let (volumes, sequences, primitive_calls) = match result {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(parent: ctx.span.span(), error = %e, "Registration run failed");
                self.progress.status("run", format!("failed: {}", e));
                return Err(e);
            }
        };
        self.progress.status("run", "finished");

        let report = RunReport {
            run_id,
            started_at,
            primitive: self.primitive.name().to_string(),
            volume_count: labels.len(),
            labels: labels.clone(),
            dimensions: dims,
            iterations: self.schedule.iterations,
            first_plane: self.schedule.first_plane,
            include_self_pair: self.schedule.include_self_pair,
            threads,
            primitive_calls,
            stage_stats: stage_stats(&ctx.stage_times),
            stage_times: ctx.stage_times,
            planes: ctx.planes,
            total_ms: duration.as_secs_f64() * 1000.0,
        };

        let members = labels
            .into_iter()
            .zip(volumes)
            .zip(sequences)
            .map(|((label, volume), sequence)| RegisteredVolume {
                label,
                volume,
                sequence,
            })
            .collect();

        Ok(RegistrationOutcome { members, report })
    }

    fn execute(
        &self,
        cohort: Cohort,
        ctx: &mut RunContext,
    ) -> Result<(Vec<Volume>, Vec<TransformSequence>, usize)> {
        let n = cohort.len();
        let dims = cohort.dims();
        let iterations = self.schedule.iterations;
        let first_plane = self.schedule.first_plane;

        let pool = WorkerPool::new(n, self.core_budget)?;
        let averager = PairwiseAverager::new(self.primitive.as_ref(), &self.params)
            .include_self_pair(self.schedule.include_self_pair);

        let mut sequences = (0..n)
            .map(|_| TransformSequence::new(iterations, dims, first_plane))
            .collect::<Result<Vec<_>>>()?;
        let (_, mut volumes) = cohort.into_parts();

        let lead_in = first_plane.lead_in();
        if lead_in > 0 {
            volumes = self.stage(ctx, STAGE_LEAD_IN, 0, first_plane, n, || {
                pool.fork_join(STAGE_LEAD_IN, volumes, |_, volume| {
                    Reslicer::reslice_times(volume, lead_in)
                })
            })?;
        }

        for iteration in 0..iterations {
            for plane in first_plane.pass_order() {
                self.progress.status(
                    STAGE_RESLICE,
                    format!("iteration {}/{}, plane {}", iteration + 1, iterations, plane),
                );

                volumes = self.stage(ctx, STAGE_RESLICE, iteration, plane, n, || {
                    self.progress.begin(STAGE_RESLICE, n);
                    pool.fork_join(STAGE_RESLICE, volumes, |_, volume| {
                        let resliced = Reslicer::reslice(&volume);
                        self.progress.advance(STAGE_RESLICE);
                        resliced
                    })
                })?;
                ensure_count(STAGE_RESLICE, n, volumes.len(), iteration, plane)?;

                let projections = self.stage(ctx, STAGE_PROJECT, iteration, plane, n, || {
                    pool.fork_join(STAGE_PROJECT, volumes.iter().collect(), |_, volume: &Volume| {
                        Ok(volume.mean_projection())
                    })
                })?;

                let fields = self.stage(ctx, STAGE_REGISTER, iteration, plane, n, || {
                    averager.average_all(&pool, &projections, &self.progress)
                })?;
                ensure_count(STAGE_REGISTER, n, fields.len(), iteration, plane)?;

                let (width, height) = (volumes[0].width(), volumes[0].height());
                ctx.planes.push(PlaneSummary {
                    iteration,
                    plane,
                    mean_displacement: fields
                        .iter()
                        .map(|f| f.mean_displacement(width, height))
                        .collect(),
                });

                volumes = self.stage(ctx, STAGE_WARP, iteration, plane, n, || {
                    self.progress.begin(STAGE_WARP, n);
                    let work = volumes.into_iter().zip(fields.iter()).collect();
                    pool.fork_join(STAGE_WARP, work, |_, (volume, field)| {
                        let warped = field.warp_volume(&volume);
                        self.progress.advance(STAGE_WARP);
                        warped
                    })
                })?;
                ensure_count(STAGE_WARP, n, volumes.len(), iteration, plane)?;

                self.stage(ctx, STAGE_STORE, iteration, plane, n, || {
                    for (sequence, field) in sequences.iter_mut().zip(fields) {
                        sequence.set(iteration, plane, field)?;
                    }
                    Ok(())
                })?;
            }
        }

        let lead_out = Reslicer::inverse_count(lead_in);
        if lead_out > 0 {
            volumes = self.stage(ctx, STAGE_LEAD_OUT, iterations - 1, first_plane, n, || {
                pool.fork_join(STAGE_LEAD_OUT, volumes, |_, volume| {
                    Reslicer::reslice_times(volume, lead_out)
                })
            })?;
        }

        for sequence in &sequences {
            sequence.ensure_complete()?;
        }

        Ok((volumes, sequences, averager.calls()))
    }

    fn stage<T, F>(
        &self,
        ctx: &mut RunContext,
        stage: &str,
        iteration: usize,
        plane: OrthogonalPlane,
        items: usize,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let span = StageSpan::new(ctx.span.span(), stage, iteration, plane.as_str());
        let result = f().map_err(|e| e.in_stage(stage, iteration, plane));
        let duration = span.finish(items);

        self.metrics.record(stage, duration, Some(ctx.run_id));
        ctx.stage_times.push(StageTime {
            stage_name: stage.to_string(),
            iteration: Some(iteration),
            plane: Some(plane),
            duration_ms: duration.as_secs_f64() * 1000.0,
        });
        result
    }
}

fn ensure_count(
    stage: &str,
    expected: usize,
    actual: usize,
    iteration: usize,
    plane: OrthogonalPlane,
) -> Result<()> {
    if actual < expected {
        return Err(RegistrationError::MissingVolume {
            stage: stage.to_string(),
            index: actual,
        }
        .in_stage(stage, iteration, plane));
    }
    if actual > expected {
        return Err(RegistrationError::CountMismatch { expected, actual }
            .in_stage(stage, iteration, plane));
    }
    Ok(())
}

fn stage_stats(times: &[StageTime]) -> Vec<PerformanceStats> {
    let mut by_stage: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for time in times {
        by_stage
            .entry(time.stage_name.as_str())
            .or_default()
            .push(time.duration_ms);
    }
    by_stage
        .into_iter()
        .filter_map(|(stage, durations)| PerformanceStats::from_durations(stage, &durations))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::ImagePair;
    use crate::data::{BitDepth, Dims};
    use crate::transform::DeformationField;

    struct Identity;

    impl RegistrationPrimitive for Identity {
        fn register_pair(&self, pair: &ImagePair<'_>, params: &ElasticParams) -> Result<DeformationField> {
            let (h, w) = pair.target.dim();
            DeformationField::identity(params.intervals(), w, h)
        }

        fn name(&self) -> &'static str {
            "Identity"
        }
    }

    struct Failing;

    impl RegistrationPrimitive for Failing {
        fn register_pair(&self, _: &ImagePair<'_>, _: &ElasticParams) -> Result<DeformationField> {
            Err(RegistrationError::primitive("no convergence"))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    fn volumes(n: usize, dims: Dims) -> Vec<Volume> {
        (0..n)
            .map(|i| {
                Volume::from_fn(dims, BitDepth::Eight, |x, y, z| ((x + y + z + i) % 7) as f32)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_identity_run_keeps_volumes() {
        for first_plane in OrthogonalPlane::ORDER {
            let mut config = Config::default();
            config.schedule.first_plane = first_plane;
            let scheduler = GroupwiseScheduler::new(Arc::new(Identity), &config)
                .unwrap()
                .with_core_budget(2);

            let inputs = volumes(2, Dims::new(5, 4, 3));
            let outcome = scheduler.register(inputs.clone()).unwrap();

            for (member, input) in outcome.members.iter().zip(&inputs) {
                assert_eq!(&member.volume, input, "first plane {}", first_plane);
                assert!(member.sequence.is_complete());
                assert_eq!(member.sequence.first_plane(), first_plane);
                assert_eq!(member.sequence.dimensions(), Dims::new(5, 4, 3));
            }
            assert_eq!(outcome.report.primitive_calls, 3 * 4);
            assert_eq!(outcome.report.threads, 2);
        }
    }

    #[test]
    fn test_primitive_failure_names_stage() {
        let scheduler = GroupwiseScheduler::new(Arc::new(Failing), &Config::default()).unwrap();
        let err = scheduler.register(volumes(2, Dims::new(4, 4, 4))).unwrap_err();
        match &err {
            RegistrationError::Stage {
                stage,
                iteration,
                plane,
                ..
            } => {
                assert_eq!(stage, STAGE_REGISTER);
                assert_eq!(*iteration, 0);
                assert_eq!(plane, "YZ");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), crate::error::ErrorKind::Primitive);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.schedule.iterations = 0;
        assert!(GroupwiseScheduler::new(Arc::new(Identity), &config).is_err());
    }

    #[test]
    fn test_report_stage_times() {
        let mut config = Config::default();
        config.schedule.iterations = 2;
        config.schedule.first_plane = OrthogonalPlane::XY;
        let scheduler = GroupwiseScheduler::new(Arc::new(Identity), &config).unwrap();
        let outcome = scheduler.register(volumes(3, Dims::new(4, 4, 4))).unwrap();

        let report = &outcome.report;
        assert_eq!(report.planes.len(), 6);
        // lead-in + 2 iterations x 3 planes x 5 stages + lead-out
        assert_eq!(report.stage_times.len(), 1 + 30 + 1);
        assert!(report.stage_stats.iter().any(|s| s.operation == STAGE_WARP && s.count == 6));
        assert!(report.planes.iter().all(|p| p.mean_displacement.iter().all(|d| *d < 1e-9)));
    }
}
