//! Label-guided block projection of a signal volume.
//!
//! The signal is masked by one label, then cut into blocks of a fixed physical
//! size. Every block takes the mean of the non-zero voxels inside a larger
//! sample window centred on it, and the block values are painted back into a
//! 32-bit volume that is masked by the label again.

use ndarray::{s, Array2, Array3, Zip};
use serde::{Deserialize, Serialize};

use crate::config::ProjectionConfig;
use crate::data::{BitDepth, Calibration, Dims, Volume};
use crate::error::{RegistrationError, Result};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::progress::ProgressReporter;

pub const STAGE_PROJECT_LABEL: &str = "project-label";

/// Rescaling applied to block values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalisation {
    /// Divide by the smallest positive block value.
    Background,
    /// Divide by the largest block value.
    Peak,
    None,
}

/// Block geometry in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    pub block: Dims,
    pub window: Dims,
    pub blocks: Dims,
}

impl BlockGrid {
    /// Voxel range `[start, end)` of the sample window of block `b` on one axis.
    fn window_range(b: usize, block: usize, window: usize, len: usize) -> (usize, usize) {
        let start = (b * block) as isize - ((window - block) / 2) as isize;
        let end = start + window as isize;
        (start.max(0) as usize, (end.max(0) as usize).min(len))
    }
}

pub struct BlockSampler {
    block_size: f64,
    sample_radius: usize,
    normalisation: Normalisation,
    core_budget: usize,
}

impl BlockSampler {
    pub fn new(block_size: f64, sample_radius: usize) -> Self {
        Self {
            block_size,
            sample_radius: sample_radius.max(1),
            normalisation: Normalisation::Background,
            core_budget: 1,
        }
    }

    pub fn from_config(config: &ProjectionConfig, core_budget: usize) -> Self {
        Self::new(config.block_size, config.sample_radius)
            .with_normalisation(config.normalisation)
            .with_core_budget(core_budget)
    }

    pub fn with_normalisation(mut self, normalisation: Normalisation) -> Self {
        self.normalisation = normalisation;
        self
    }

    pub fn with_core_budget(mut self, core_budget: usize) -> Self {
        self.core_budget = core_budget.max(1);
        self
    }

    /// Block and window sizes for a volume of `dims` with `calibration`.
    pub fn grid(&self, dims: Dims, calibration: &Calibration) -> Result<BlockGrid> {
        if !(self.block_size.is_finite() && self.block_size > 0.0) {
            return Err(RegistrationError::invalid_configuration(
                "block size must be positive",
            ));
        }
        let bw = (self.block_size / calibration.x).ceil().max(1.0) as usize;
        let bh = (self.block_size / calibration.y).ceil().max(1.0) as usize;
        let bd = (bw as f64 * calibration.x / calibration.z).ceil().max(1.0) as usize;

        let block = Dims::new(bw, bh, bd);
        let window = Dims::new(
            bw * self.sample_radius,
            bh * self.sample_radius,
            bd * self.sample_radius,
        );
        let blocks = Dims::new(
            dims.x.div_ceil(bw),
            dims.y.div_ceil(bh),
            dims.z.div_ceil(bd),
        );
        Ok(BlockGrid {
            block,
            window,
            blocks,
        })
    }

    /// Project `input` onto the region of `label` equal to `label_value`.
    pub fn project(&self, label: &Volume, label_value: f32, input: &Volume) -> Result<Volume> {
        self.project_with_progress(label, label_value, input, &ProgressReporter::disabled())
    }

    pub fn project_with_progress(
        &self,
        label: &Volume,
        label_value: f32,
        input: &Volume,
        progress: &ProgressReporter,
    ) -> Result<Volume> {
        let dims = input.dims();
        if label.dims() != dims {
            return Err(RegistrationError::DimensionMismatch {
                index: 1,
                expected: label.dims(),
                actual: dims,
            });
        }

        let mut masked = input.data().clone();
        Zip::from(&mut masked).and(label.data()).for_each(|v, &l| {
            if l != label_value {
                *v = 0.0;
            }
        });

        let grid = self.grid(dims, input.calibration())?;
        let block_values = self.sample_blocks(&masked, &grid, progress)?;
        let block_values = normalise(block_values, self.normalisation);

        let data = Array3::from_shape_fn(dims.shape(), |(z, y, x)| {
            if label.data()[[z, y, x]] != label_value {
                0.0
            } else {
                block_values[[z / grid.block.z, y / grid.block.y, x / grid.block.x]]
            }
        });

        tracing::debug!(
            block = %grid.block,
            window = %grid.window,
            blocks = %grid.blocks,
            normalisation = ?self.normalisation,
            "Projected signal onto label"
        );
        Volume::new(data, input.calibration().clone(), BitDepth::ThirtyTwo)
    }

    /// Mean of non-zero voxels in each block's window, shape `(bz, by, bx)`.
    ///
    /// Block layers are split across workers; each worker gets an owned slab
    /// covering its layers plus the window halo above and below.
    fn sample_blocks(
        &self,
        masked: &Array3<f32>,
        grid: &BlockGrid,
        progress: &ProgressReporter,
    ) -> Result<Array3<f32>> {
        let (depth, _, _) = masked.dim();
        let layers = grid.blocks.z;
        let pool = WorkerPool::new(layers, self.core_budget)?;
        let per_worker = layers.div_ceil(pool.threads());

        let partitions: Vec<(usize, usize, usize, Array3<f32>)> = (0..layers)
            .step_by(per_worker)
            .map(|first| {
                let last = (first + per_worker).min(layers);
                let (z0, _) = BlockGrid::window_range(first, grid.block.z, grid.window.z, depth);
                let (_, z1) = BlockGrid::window_range(last - 1, grid.block.z, grid.window.z, depth);
                let slab = masked.slice(s![z0..z1, .., ..]).to_owned();
                (first, last, z0, slab)
            })
            .collect();

        progress.begin(STAGE_PROJECT_LABEL, layers);
        let results = pool.fork_join(
            STAGE_PROJECT_LABEL,
            partitions,
            |_, (first, last, z0, slab)| {
                let layers: Vec<Array2<f32>> = (first..last)
                    .map(|bz| {
                        let layer = sample_layer(&slab, z0, depth, bz, grid);
                        progress.advance(STAGE_PROJECT_LABEL);
                        layer
                    })
                    .collect();
                Ok(layers)
            },
        )?;

        let mut values = Array3::zeros((layers, grid.blocks.y, grid.blocks.x));
        for (bz, layer) in results.into_iter().flatten().enumerate() {
            values.slice_mut(s![bz, .., ..]).assign(&layer);
        }
        Ok(values)
    }
}

fn sample_layer(slab: &Array3<f32>, z0: usize, depth: usize, bz: usize, grid: &BlockGrid) -> Array2<f32> {
    let (_, height, width) = slab.dim();
    let (zs, ze) = BlockGrid::window_range(bz, grid.block.z, grid.window.z, depth);

    Array2::from_shape_fn((grid.blocks.y, grid.blocks.x), |(by, bx)| {
        let (ys, ye) = BlockGrid::window_range(by, grid.block.y, grid.window.y, height);
        let (xs, xe) = BlockGrid::window_range(bx, grid.block.x, grid.window.x, width);
        let window = slab.slice(s![zs - z0..ze - z0, ys..ye, xs..xe]);

        let (sum, count) = window
            .iter()
            .filter(|&&v| v != 0.0)
            .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));
        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    })
}

fn normalise(mut values: Array3<f32>, normalisation: Normalisation) -> Array3<f32> {
    let divisor = match normalisation {
        Normalisation::None => None,
        Normalisation::Background => values
            .iter()
            .copied()
            .filter(|&v| v > 0.0)
            .min_by(|a, b| a.total_cmp(b)),
        Normalisation::Peak => values
            .iter()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
            .filter(|&v| v > 0.0),
    };
    if let Some(divisor) = divisor {
        values.mapv_inplace(|v| v / divisor);
    }
    values
}
