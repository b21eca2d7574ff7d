//! In-memory 3D voxel grids with physical calibration.

use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RegistrationError, Result};

/// Grid extent along each axis, in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dims {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dims {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Geometry after one reslice: (x, y, z) -> (y, z, x).
    pub fn resliced(self) -> Self {
        Self {
            x: self.y,
            y: self.z,
            z: self.x,
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn is_degenerate(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    /// ndarray shape in (depth, height, width) order.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.z, self.y, self.x)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Physical voxel spacing per axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub unit: String,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
            unit: "pixel".to_string(),
        }
    }
}

impl Calibration {
    pub fn new(x: f64, y: f64, z: f64, unit: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            unit: unit.into(),
        }
    }

    /// Spacing after one reslice, permuted like [`Dims::resliced`].
    pub fn resliced(&self) -> Self {
        Self {
            x: self.y,
            y: self.z,
            z: self.x,
            unit: self.unit.clone(),
        }
    }
}

/// Value range semantics of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    #[serde(rename = "8")]
    Eight,
    #[serde(rename = "16")]
    Sixteen,
    #[serde(rename = "32")]
    ThirtyTwo,
}

impl BitDepth {
    /// Largest representable value, `None` for float volumes.
    pub fn max_value(self) -> Option<f32> {
        match self {
            BitDepth::Eight => Some(u8::MAX as f32),
            BitDepth::Sixteen => Some(u16::MAX as f32),
            BitDepth::ThirtyTwo => None,
        }
    }

    /// Round and clamp a value into this depth's range.
    pub fn quantize(self, value: f32) -> f32 {
        match self.max_value() {
            Some(max) => value.round().clamp(0.0, max),
            None => value,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
            BitDepth::ThirtyTwo => 32,
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// A 3D scalar voxel grid.
///
/// Voxels are stored as `f32` in an `ndarray` of shape `(depth, height, width)`,
/// so `data[[z, y, x]]` addresses voxel `(x, y, z)`. The bit depth governs the value
/// range writers must respect; 8 and 16-bit volumes only ever hold whole numbers
/// inside their range.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    calibration: Calibration,
    bit_depth: BitDepth,
}

impl Volume {
    /// Wrap an existing grid, rejecting zero-sized input.
    pub fn new(data: Array3<f32>, calibration: Calibration, bit_depth: BitDepth) -> Result<Self> {
        let (d, h, w) = data.dim();
        if d == 0 || h == 0 || w == 0 {
            return Err(RegistrationError::invalid_dimensions(format!(
                "volume must be non-empty, got {}x{}x{}",
                w, h, d
            )));
        }
        Ok(Self {
            data,
            calibration,
            bit_depth,
        })
    }

    pub fn zeros(dims: Dims, bit_depth: BitDepth) -> Result<Self> {
        Self::new(Array3::zeros(dims.shape()), Calibration::default(), bit_depth)
    }

    /// Build a volume by evaluating `f(x, y, z)` at every voxel.
    pub fn from_fn<F>(dims: Dims, bit_depth: BitDepth, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let data = Array3::from_shape_fn(dims.shape(), |(z, y, x)| f(x, y, z));
        Self::new(data, Calibration::default(), bit_depth)
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn dims(&self) -> Dims {
        let (d, h, w) = self.data.dim();
        Dims::new(w, h, d)
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[[z, y, x]]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        self.data[[z, y, x]] = value;
    }

    pub fn slice(&self, z: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), z)
    }

    pub fn slice_mut(&mut self, z: usize) -> ArrayViewMut2<'_, f32> {
        self.data.index_axis_mut(Axis(0), z)
    }

    /// Replace the voxel grid, keeping calibration and bit depth.
    pub fn with_data(&self, data: Array3<f32>) -> Result<Self> {
        Self::new(data, self.calibration.clone(), self.bit_depth)
    }

    /// Average-intensity projection along z.
    pub fn mean_projection(&self) -> Array2<f32> {
        let depth = self.depth() as f32;
        self.data.sum_axis(Axis(0)).mapv(|v| v / depth)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    /// Binary mask of one label: matching voxels become 255, the rest 0.
    pub fn isolate_label(&self, label: f32) -> Volume {
        Volume {
            data: self
                .data
                .mapv(|v| if v == label { u8::MAX as f32 } else { 0.0 }),
            calibration: self.calibration.clone(),
            bit_depth: BitDepth::Eight,
        }
    }

    /// Distinct non-zero values present, ascending.
    pub fn labels(&self) -> Vec<f32> {
        let mut labels: Vec<f32> = self.data.iter().copied().filter(|&v| v != 0.0).collect();
        labels.sort_by(|a, b| a.total_cmp(b));
        labels.dedup();
        labels
    }
}

/// Check that every volume has the geometry of the first one.
pub fn ensure_same_dims<'a, I>(volumes: I) -> Result<Option<Dims>>
where
    I: IntoIterator<Item = &'a Volume>,
{
    let mut expected = None;
    for (index, volume) in volumes.into_iter().enumerate() {
        let actual = volume.dims();
        match expected {
            None => expected = Some(actual),
            Some(expected) if expected != actual => {
                return Err(RegistrationError::DimensionMismatch {
                    index,
                    expected,
                    actual,
                });
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}
