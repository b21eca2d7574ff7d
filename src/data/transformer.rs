use super::volume::Volume;
use crate::error::{RegistrationError, Result};

/// Axis-permuting geometric transforms between orthogonal slice planes.
pub struct Reslicer;

impl Reslicer {
    /// Present the next orthogonal plane as the slice plane.
    ///
    /// Voxel `(x, y, z)` of the input lands at `(y, z, x)` of the output, so
    /// width becomes the old height, height the old depth and depth the old width.
    /// Calibration is permuted the same way. Three applications give back the
    /// input volume.
    pub fn reslice(volume: &Volume) -> Result<Volume> {
        if volume.dims().is_degenerate() {
            return Err(RegistrationError::invalid_dimensions(format!(
                "cannot reslice a {} volume",
                volume.dims()
            )));
        }

        // (z, y, x) -> (x, z, y) in storage order
        let permuted = volume.data().view().permuted_axes([2, 0, 1]);
        let data = permuted.as_standard_layout().into_owned();

        Volume::new(data, volume.calibration().resliced(), volume.bit_depth())
    }

    /// Apply [`Reslicer::reslice`] `times` times (taken modulo 3).
    pub fn reslice_times(volume: Volume, times: usize) -> Result<Volume> {
        let mut current = volume;
        for _ in 0..times % 3 {
            current = Self::reslice(&current)?;
        }
        Ok(current)
    }

    /// Number of reslices undoing `times` reslices.
    pub fn inverse_count(times: usize) -> usize {
        (3 - times % 3) % 3
    }
}
