//! Fixed-size bin sampling of volumes into a feature table.
//!
//! Each volume is cut into bins of a fixed physical edge, starting at the
//! origin; bins on the far edges are clipped to the volume. A bin's value is
//! the mean of its positive voxels, and bins without any are left out. The
//! per-volume samples are collected into one table with a row per volume and a
//! column per bin, ready for clustering tools that read tab-separated input.

use ndarray::{s, Array3};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::SamplingConfig;
use crate::data::{Calibration, Dims, Volume};
use crate::error::{RegistrationError, Result};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::progress::ProgressReporter;

pub const STAGE_SAMPLE: &str = "sample";

/// Position of a bin in the bin grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BinIndex {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl BinIndex {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Column key, e.g. `0000001x0000000x0000002`.
    pub fn key(&self) -> String {
        grid_key(self.x, self.y, self.z)
    }
}

fn grid_key(x: usize, y: usize, z: usize) -> String {
    format!("{:07}x{:07}x{:07}", x, y, z)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinSample {
    pub bin: BinIndex,
    pub mean: f64,
    /// Positive voxels that went into the mean.
    pub voxels: usize,
}

/// Bin samples of one volume, ordered by z, then y, then x.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSamples {
    /// Bin edge in voxels.
    pub bin: Dims,
    /// Bin count per axis.
    pub bins: Dims,
    pub samples: Vec<BinSample>,
}

impl VolumeSamples {
    pub fn get(&self, bin: BinIndex) -> Option<&BinSample> {
        self.samples.iter().find(|s| s.bin == bin)
    }
}

pub struct BinSampler {
    bin_size: f64,
    core_budget: usize,
}

impl BinSampler {
    pub fn new(bin_size: f64) -> Self {
        Self {
            bin_size,
            core_budget: 1,
        }
    }

    pub fn from_config(config: &SamplingConfig, core_budget: usize) -> Self {
        Self::new(config.bin_size).with_core_budget(core_budget)
    }

    pub fn with_core_budget(mut self, core_budget: usize) -> Self {
        self.core_budget = core_budget.max(1);
        self
    }

    /// Bin edge in voxels for `calibration`.
    ///
    /// Sizes are physical unless the volume is uncalibrated (unit `pixel`),
    /// in which case they are taken as voxels. Fractions are truncated and
    /// every edge is at least one voxel.
    pub fn bin_dims(&self, calibration: &Calibration) -> Result<Dims> {
        if !(self.bin_size.is_finite() && self.bin_size > 0.0) {
            return Err(RegistrationError::invalid_configuration(
                "bin size must be positive",
            ));
        }
        let uncalibrated = matches!(
            calibration.unit.to_ascii_lowercase().as_str(),
            "pixel" | "pixels" | "voxel" | "voxels"
        );
        let edge = |spacing: f64| -> usize {
            let voxels = if uncalibrated || spacing <= 0.0 {
                self.bin_size
            } else {
                self.bin_size / spacing
            };
            (voxels.floor() as usize).max(1)
        };
        Ok(Dims::new(
            edge(calibration.x),
            edge(calibration.y),
            edge(calibration.z),
        ))
    }

    pub fn sample(&self, volume: &Volume) -> Result<VolumeSamples> {
        self.sample_with_progress(volume, &ProgressReporter::disabled())
    }

    /// Sample every bin of `volume`. Bin layers along z are split across the
    /// worker pool.
    pub fn sample_with_progress(
        &self,
        volume: &Volume,
        progress: &ProgressReporter,
    ) -> Result<VolumeSamples> {
        let dims = volume.dims();
        let bin = self.bin_dims(volume.calibration())?;
        let bins = Dims::new(
            dims.x.div_ceil(bin.x),
            dims.y.div_ceil(bin.y),
            dims.z.div_ceil(bin.z),
        );

        let layers = bins.z;
        let pool = WorkerPool::new(layers, self.core_budget)?;
        let per_worker = layers.div_ceil(pool.threads()).max(1);
        let partitions: Vec<(usize, usize)> = (0..layers)
            .step_by(per_worker)
            .map(|first| (first, (first + per_worker).min(layers)))
            .collect();

        let data = volume.data();
        progress.begin(STAGE_SAMPLE, layers);
        let results = pool.fork_join(STAGE_SAMPLE, partitions, |_, (first, last)| {
            let mut samples = Vec::new();
            for bz in first..last {
                samples.extend(sample_layer(data, bz, bin, bins));
                progress.advance(STAGE_SAMPLE);
            }
            Ok(samples)
        })?;

        let samples: Vec<BinSample> = results.into_iter().flatten().collect();
        tracing::debug!(
            dims = %dims,
            bin = %bin,
            bins = %bins,
            kept = samples.len(),
            "Sampled volume"
        );
        Ok(VolumeSamples { bin, bins, samples })
    }
}

fn sample_layer(data: &Array3<f32>, bz: usize, bin: Dims, bins: Dims) -> Vec<BinSample> {
    let (depth, height, width) = data.dim();
    let (z0, z1) = (bz * bin.z, ((bz + 1) * bin.z).min(depth));

    let mut samples = Vec::new();
    for by in 0..bins.y {
        let (y0, y1) = (by * bin.y, ((by + 1) * bin.y).min(height));
        for bx in 0..bins.x {
            let (x0, x1) = (bx * bin.x, ((bx + 1) * bin.x).min(width));
            let (sum, voxels) = data
                .slice(s![z0..z1, y0..y1, x0..x1])
                .iter()
                .filter(|&&v| v > 0.0)
                .fold((0.0f64, 0usize), |(sum, n), &v| (sum + v as f64, n + 1));
            if voxels > 0 {
                samples.push(BinSample {
                    bin: BinIndex::new(bx, by, bz),
                    mean: sum / voxels as f64,
                    voxels,
                });
            }
        }
    }
    samples
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    pub label: String,
    /// Bin means keyed by [`BinIndex::key`].
    pub values: BTreeMap<String, f64>,
}

/// Bin means of several volumes sharing one bin grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleTable {
    pub bins: Option<Dims>,
    pub rows: Vec<SampleRow>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one volume's samples as a row. Every row must come from the same
    /// bin grid.
    pub fn push(&mut self, label: impl Into<String>, samples: &VolumeSamples) -> Result<()> {
        match self.bins {
            Some(expected) if expected != samples.bins => {
                return Err(RegistrationError::DimensionMismatch {
                    index: self.rows.len(),
                    expected,
                    actual: samples.bins,
                });
            }
            Some(_) => {}
            None => self.bins = Some(samples.bins),
        }
        self.rows.push(SampleRow {
            label: label.into(),
            values: samples
                .samples
                .iter()
                .map(|s| (s.bin.key(), s.mean))
                .collect(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every bin kept by at least one row, in key order.
    pub fn columns(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.values.keys()).collect();
        keys.into_iter().cloned().collect()
    }

    /// Tab-separated table. The corner cell holds the bin grid size and cells
    /// of bins a row left out are empty.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let columns = self.columns();
        let corner = self
            .bins
            .map(|b| grid_key(b.x, b.y, b.z))
            .unwrap_or_default();

        write!(writer, "{}", corner)?;
        for column in &columns {
            write!(writer, "\t{}", column)?;
        }
        writeln!(writer)?;

        for row in &self.rows {
            write!(writer, "{}", row.label)?;
            for column in &columns {
                match row.values.get(column) {
                    Some(value) => write!(writer, "\t{}", value)?,
                    None => write!(writer, "\t")?,
                }
            }
            writeln!(writer)?;
        }
        writer.flush()
    }

    /// Save as JSON when `path` ends in `.json`, tab-separated otherwise.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RegistrationError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| RegistrationError::io(path, e))?;
        let writer = BufWriter::new(file);

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if is_json {
            serde_json::to_writer_pretty(writer, self).map_err(|e| {
                RegistrationError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
        } else {
            self.write_tsv(writer).map_err(|e| RegistrationError::io(path, e))?;
        }
        tracing::debug!(path = %path.display(), rows = self.rows.len(), "Saved sample table");
        Ok(())
    }
}
