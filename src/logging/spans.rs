//! Structured spans for registration runs
//!
//! One [`RunSpan`] covers a whole groupwise run; a [`StageSpan`] covers one
//! stage of one (iteration, plane) step and reports its duration when finished.

use std::time::{Duration, Instant};
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span for a complete registration run
pub struct RunSpan {
    span: Span,
    start_time: Instant,
    run_id: Uuid,
}

impl RunSpan {
    pub fn new(run_id: Uuid, volumes: usize, iterations: usize, threads: usize) -> Self {
        let span = span!(
            Level::INFO,
            "registration_run",
            run_id = %run_id,
            volumes = volumes,
            iterations = iterations,
            threads = threads,
            success = field::Empty,
            duration_ms = field::Empty
        );

        Self {
            span,
            start_time: Instant::now(),
            run_id,
        }
    }

    /// Record run completion
    pub fn record_completion(&self, success: bool, primitive_calls: usize) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("success", success);
        self.span.record("duration_ms", duration.as_millis() as u64);

        tracing::info!(
            parent: &self.span,
            success = success,
            primitive_calls = primitive_calls,
            duration_ms = duration.as_millis() as u64,
            "Registration run finished"
        );
        duration
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for one stage of one (iteration, plane) step
pub struct StageSpan {
    span: Span,
    start_time: Instant,
    stage: String,
}

impl StageSpan {
    pub fn new(parent: &Span, stage: &str, iteration: usize, plane: &str) -> Self {
        let span = span!(
            parent: parent,
            Level::DEBUG,
            "pipeline_stage",
            stage = stage,
            iteration = iteration,
            plane = plane,
            duration_ms = field::Empty
        );

        Self {
            span,
            start_time: Instant::now(),
            stage: stage.to_string(),
        }
    }

    /// Record stage completion, returning its duration
    pub fn finish(&self, items: usize) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        tracing::debug!(
            parent: &self.span,
            stage = %self.stage,
            items = items,
            duration_ms = duration.as_secs_f64() * 1000.0,
            "Stage completed"
        );
        duration
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span() {
        let run_id = Uuid::new_v4();
        let span = RunSpan::new(run_id, 3, 1, 3);
        assert_eq!(span.run_id(), run_id);
        {
            let _guard = span.enter();
        }
        let duration = span.record_completion(true, 27);
        assert!(duration >= Duration::ZERO);
    }

    #[test]
    fn test_stage_span() {
        let run = RunSpan::new(Uuid::new_v4(), 2, 1, 2);
        let stage = StageSpan::new(run.span(), "reslice", 0, "YZ");
        assert_eq!(stage.stage(), "reslice");
        let duration = stage.finish(2);
        assert!(duration <= run.start_time.elapsed());
    }
}
