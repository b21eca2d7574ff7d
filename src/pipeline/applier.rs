use crate::data::{Dims, Reslicer, Volume};
use crate::error::{RegistrationError, Result};
use crate::transform::{DeformationField, TransformSequence};

use super::pool::WorkerPool;
use super::progress::ProgressReporter;

pub const STAGE_APPLY: &str = "apply";

/// Replays a recorded [`TransformSequence`] on a new volume.
///
/// The replay reproduces the recorded run step for step: the same lead-in,
/// one reslice plus slice-wise warp per (iteration, plane), the same lead-out.
#[derive(Debug, Clone, Default)]
pub struct SequenceApplier {
    rescale: bool,
    iterations: Option<usize>,
}

impl SequenceApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow volumes whose dimensions differ from the recorded ones; stored
    /// fields are scaled per axis to the volume's size.
    pub fn with_rescale(mut self, rescale: bool) -> Self {
        self.rescale = rescale;
        self
    }

    /// Replay only the first `iterations` iterations (clamped to `1..=count`).
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Iterations that will be replayed for `sequence`.
    pub fn effective_iterations(&self, sequence: &TransformSequence) -> usize {
        let count = sequence.iteration_count();
        self.iterations.unwrap_or(count).clamp(1, count)
    }

    fn check_compatible(&self, sequence: &TransformSequence, dims: Dims) -> Result<()> {
        let reference = sequence.dimensions();
        if dims == reference {
            return Ok(());
        }
        if !self.rescale {
            return Err(RegistrationError::incompatible_sequence(format!(
                "volume is {} but the sequence was computed for {}",
                dims, reference
            )));
        }
        for (actual, recorded) in [(dims.x, reference.x), (dims.y, reference.y), (dims.z, reference.z)] {
            axis_scale(actual, recorded)?;
        }
        Ok(())
    }

    /// Apply `sequence` to `volume`, returning the registered volume.
    pub fn apply(&self, sequence: &TransformSequence, volume: Volume) -> Result<Volume> {
        self.apply_with_progress(sequence, volume, &ProgressReporter::disabled())
    }

    pub fn apply_with_progress(
        &self,
        sequence: &TransformSequence,
        volume: Volume,
        progress: &ProgressReporter,
    ) -> Result<Volume> {
        self.check_compatible(sequence, volume.dims())?;

        let iterations = self.effective_iterations(sequence);
        let first_plane = sequence.first_plane();
        let planes = first_plane.pass_order();

        // every slot that will be replayed must exist before any work starts
        for iteration in 0..iterations {
            for plane in planes {
                sequence.get(iteration, plane)?;
            }
        }

        tracing::debug!(
            dims = %volume.dims(),
            reference = %sequence.dimensions(),
            iterations,
            first_plane = %first_plane,
            rescale = self.rescale,
            "Applying transform sequence"
        );

        let lead_in = first_plane.lead_in();
        let mut current = Reslicer::reslice_times(volume, lead_in)?;
        let mut reference = (0..lead_in).fold(sequence.dimensions(), |d, _| d.resliced());

        progress.begin(STAGE_APPLY, iterations * planes.len());
        for iteration in 0..iterations {
            for plane in planes {
                current = Reslicer::reslice(&current)?;
                reference = reference.resliced();

                let stored = sequence.get(iteration, plane)?;
                let field = scaled_field(stored, reference, current.dims())
                    .map_err(|e| e.in_stage(STAGE_APPLY, iteration, plane))?;
                current = field
                    .warp_volume(&current)
                    .map_err(|e| e.in_stage(STAGE_APPLY, iteration, plane))?;
                progress.advance(STAGE_APPLY);
            }
        }

        Reslicer::reslice_times(current, Reslicer::inverse_count(lead_in))
    }

    /// Apply one sequence to several companion volumes in parallel.
    pub fn apply_all(
        &self,
        sequence: &TransformSequence,
        volumes: Vec<Volume>,
        core_budget: usize,
    ) -> Result<Vec<Volume>> {
        let pool = WorkerPool::new(volumes.len(), core_budget)?;
        pool.fork_join(STAGE_APPLY, volumes, |_, volume| self.apply(sequence, volume))
    }
}

/// Factor mapping recorded positions on one axis onto `actual` voxels.
///
/// A single-voxel axis has no extent to scale, so it only matches another
/// single-voxel axis.
fn axis_scale(actual: usize, reference: usize) -> Result<f64> {
    if actual == reference {
        return Ok(1.0);
    }
    if actual <= 1 || reference <= 1 {
        return Err(RegistrationError::incompatible_sequence(format!(
            "cannot rescale an axis of {} voxels recorded as {}",
            actual, reference
        )));
    }
    Ok((actual - 1) as f64 / (reference - 1) as f64)
}

fn scaled_field(field: &DeformationField, reference: Dims, actual: Dims) -> Result<DeformationField> {
    if reference == actual {
        return Ok(field.clone());
    }
    Ok(field.scaled(
        axis_scale(actual.x, reference.x)?,
        axis_scale(actual.y, reference.y)?,
    ))
}
