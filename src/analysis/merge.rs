use ndarray::{Array3, Zip};

use crate::data::{ensure_same_dims, BitDepth, Volume};
use crate::error::{RegistrationError, Result};

/// Per-voxel statistics over a set of registered volumes.
#[derive(Debug, Clone)]
pub struct MergedVolumes {
    pub mean: Volume,
    /// Population standard deviation.
    pub std_dev: Volume,
    pub count: usize,
}

/// Mean and standard deviation of each voxel across `volumes`, as 32-bit volumes.
pub fn merge(volumes: &[Volume]) -> Result<MergedVolumes> {
    let dims = ensure_same_dims(volumes)?
        .ok_or_else(|| RegistrationError::invalid_configuration("merge needs at least 1 volume"))?;

    let count = volumes.len() as f64;
    let mut sum = Array3::<f64>::zeros(dims.shape());
    let mut sum_sq = Array3::<f64>::zeros(dims.shape());
    for volume in volumes {
        Zip::from(&mut sum)
            .and(&mut sum_sq)
            .and(volume.data())
            .for_each(|s, q, &v| {
                let v = v as f64;
                *s += v;
                *q += v * v;
            });
    }

    let mean = sum.mapv(|s| (s / count) as f32);
    let mut std_dev = Array3::<f32>::zeros(dims.shape());
    Zip::from(&mut std_dev)
        .and(&sum)
        .and(&sum_sq)
        .for_each(|sd, &s, &q| {
            let m = s / count;
            *sd = (q / count - m * m).max(0.0).sqrt() as f32;
        });

    let calibration = volumes[0].calibration().clone();
    Ok(MergedVolumes {
        mean: Volume::new(mean, calibration.clone(), BitDepth::ThirtyTwo)?,
        std_dev: Volume::new(std_dev, calibration, BitDepth::ThirtyTwo)?,
        count: volumes.len(),
    })
}
