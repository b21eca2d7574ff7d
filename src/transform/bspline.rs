//! Cubic B-spline elastic deformations of 2D slices.
//!
//! A field with `I` intervals holds two `(I+3)x(I+3)` coefficient grids, `cx` and
//! `cy`, indexed `[l][k]` with `l` running along image rows and `k` along columns.
//! Coefficients are absolute source coordinates: for a target pixel `(u, v)` of a
//! `w x h` slice the spline parameters are
//!
//! ```text
//! tu = u * I / (w - 1) + 1
//! tv = v * I / (h - 1) + 1
//! ```
//!
//! and the source position is `x = sum_l sum_k cx[l][k] B(tv - l) B(tu - k)`,
//! likewise for `y`, with `B` the centred cubic B-spline.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::data::{BitDepth, Volume};
use crate::error::{RegistrationError, Result};

const EDGE_TOLERANCE: f64 = 1e-6;

/// Centred cubic B-spline basis.
#[inline]
pub fn bspline3(t: f64) -> f64 {
    let a = t.abs();
    if a < 1.0 {
        2.0 / 3.0 - a * a + a * a * a / 2.0
    } else if a < 2.0 {
        let b = 2.0 - a;
        b * b * b / 6.0
    } else {
        0.0
    }
}

/// Spline parameter of pixel `p` on an axis of `len` pixels.
#[inline]
fn spline_param(p: usize, len: usize, intervals: usize) -> f64 {
    if len <= 1 {
        1.0
    } else {
        p as f64 * intervals as f64 / (len - 1) as f64 + 1.0
    }
}

/// Non-zero basis weights `(index, weight)` of every pixel along one axis.
fn axis_weights(len: usize, intervals: usize) -> Vec<Vec<(usize, f64)>> {
    let n = intervals + 3;
    (0..len)
        .map(|p| {
            let t = spline_param(p, len, intervals);
            let base = t.floor() as isize;
            (base - 1..=base + 2)
                .filter(|&k| k >= 0 && (k as usize) < n)
                .map(|k| (k as usize, bspline3(t - k as f64)))
                .filter(|&(_, w)| w != 0.0)
                .collect()
        })
        .collect()
}

/// Bilinear sample of `image` at `(x, y)`; 0 outside the image.
fn sample_bilinear(image: &ArrayView2<f32>, x: f64, y: f64) -> f32 {
    let (h, w) = image.dim();
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    if x < -EDGE_TOLERANCE
        || y < -EDGE_TOLERANCE
        || x > max_x + EDGE_TOLERANCE
        || y > max_y + EDGE_TOLERANCE
    {
        return 0.0;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(w - 1);
    let y2 = (y1 + 1).min(h - 1);

    let fx = (x - x1 as f64) as f32;
    let fy = (y - y1 as f64) as f32;

    let p11 = image[[y1, x1]];
    let p12 = image[[y2, x1]];
    let p21 = image[[y1, x2]];
    let p22 = image[[y2, x2]];

    p11 * (1.0 - fx) * (1.0 - fy) + p21 * fx * (1.0 - fy) + p12 * (1.0 - fx) * fy + p22 * fx * fy
}

/// A 2D elastic deformation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationField {
    intervals: usize,
    cx: Array2<f64>,
    cy: Array2<f64>,
}

impl DeformationField {
    /// Build a field from coefficient grids, which must both be `(I+3)x(I+3)`.
    pub fn new(intervals: usize, cx: Array2<f64>, cy: Array2<f64>) -> Result<Self> {
        if intervals == 0 {
            return Err(RegistrationError::invalid_configuration(
                "deformation field needs at least one interval",
            ));
        }
        let n = intervals + 3;
        for (name, grid) in [("x", &cx), ("y", &cy)] {
            if grid.dim() != (n, n) {
                return Err(RegistrationError::invalid_dimensions(format!(
                    "{} coefficient grid is {:?}, expected {}x{}",
                    name,
                    grid.dim(),
                    n,
                    n
                )));
            }
        }
        Ok(Self { intervals, cx, cy })
    }

    /// The field mapping every pixel of a `width x height` slice onto itself.
    pub fn identity(intervals: usize, width: usize, height: usize) -> Result<Self> {
        Self::translation(intervals, width, height, 0.0, 0.0)
    }

    /// A field sampling target pixel `(u, v)` from source position `(u + dx, v + dy)`.
    pub fn translation(
        intervals: usize,
        width: usize,
        height: usize,
        dx: f64,
        dy: f64,
    ) -> Result<Self> {
        if intervals == 0 {
            return Err(RegistrationError::invalid_configuration(
                "deformation field needs at least one interval",
            ));
        }
        let n = intervals + 3;
        let step_x = width.saturating_sub(1) as f64 / intervals as f64;
        let step_y = height.saturating_sub(1) as f64 / intervals as f64;
        let cx = Array2::from_shape_fn((n, n), |(_, k)| (k as f64 - 1.0) * step_x + dx);
        let cy = Array2::from_shape_fn((n, n), |(l, _)| (l as f64 - 1.0) * step_y + dy);
        Ok(Self { intervals, cx, cy })
    }

    pub fn intervals(&self) -> usize {
        self.intervals
    }

    pub fn cx(&self) -> &Array2<f64> {
        &self.cx
    }

    pub fn cy(&self) -> &Array2<f64> {
        &self.cy
    }

    /// Element-wise mean of the coefficient grids.
    ///
    /// All fields must share one interval count. Averaging N copies of the same
    /// field returns that field exactly.
    pub fn average(fields: &[DeformationField]) -> Result<Self> {
        let (first, rest) = fields.split_first().ok_or_else(|| {
            RegistrationError::invalid_configuration("cannot average an empty set of fields")
        })?;

        let mut cx = first.cx.clone();
        let mut cy = first.cy.clone();
        for (i, field) in rest.iter().enumerate() {
            if field.intervals != first.intervals {
                return Err(RegistrationError::IntervalMismatch {
                    expected: first.intervals,
                    actual: field.intervals,
                });
            }
            let count = (i + 2) as f64;
            cx.zip_mut_with(&field.cx, |m, &x| *m += (x - *m) / count);
            cy.zip_mut_with(&field.cy, |m, &y| *m += (y - *m) / count);
        }

        Ok(Self {
            intervals: first.intervals,
            cx,
            cy,
        })
    }

    /// Scale the coordinates the field produces, per axis.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            intervals: self.intervals,
            cx: self.cx.mapv(|c| c * sx),
            cy: self.cy.mapv(|c| c * sy),
        }
    }

    /// Source position of target pixel `(u, v)` in a `width x height` slice.
    pub fn transform_point(&self, u: usize, v: usize, width: usize, height: usize) -> (f64, f64) {
        let tu = spline_param(u, width, self.intervals);
        let tv = spline_param(v, height, self.intervals);
        let n = self.intervals + 3;

        let mut x = 0.0;
        let mut y = 0.0;
        let base_l = tv.floor() as isize;
        let base_k = tu.floor() as isize;
        for l in (base_l - 1..=base_l + 2).filter(|&l| l >= 0 && (l as usize) < n) {
            let wl = bspline3(tv - l as f64);
            for k in (base_k - 1..=base_k + 2).filter(|&k| k >= 0 && (k as usize) < n) {
                let w = wl * bspline3(tu - k as f64);
                x += self.cx[[l as usize, k as usize]] * w;
                y += self.cy[[l as usize, k as usize]] * w;
            }
        }
        (x, y)
    }

    /// Warp one slice, rounding into `bit_depth`'s range.
    pub fn warp_slice(&self, source: ArrayView2<f32>, bit_depth: BitDepth) -> Array2<f32> {
        let (h, w) = source.dim();
        let cols = axis_weights(w, self.intervals);
        let rows = axis_weights(h, self.intervals);

        Array2::from_shape_fn((h, w), |(v, u)| {
            let mut x = 0.0;
            let mut y = 0.0;
            for &(l, wl) in &rows[v] {
                for &(k, wk) in &cols[u] {
                    let weight = wl * wk;
                    x += self.cx[[l, k]] * weight;
                    y += self.cy[[l, k]] * weight;
                }
            }
            bit_depth.quantize(sample_bilinear(&source, x, y))
        })
    }

    /// Warp every slice of a volume with this field.
    pub fn warp_volume(&self, volume: &Volume) -> Result<Volume> {
        let bit_depth = volume.bit_depth();
        let mut data = volume.data().clone();
        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(volume.data().axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut out, src)| {
                out.assign(&self.warp_slice(src, bit_depth));
            });
        volume.with_data(data)
    }

    /// Mean distance between this field's coefficients and the identity's.
    pub fn mean_displacement(&self, width: usize, height: usize) -> f64 {
        let identity = match Self::identity(self.intervals, width, height) {
            Ok(identity) => identity,
            Err(_) => return 0.0,
        };
        let total: f64 = self
            .cx
            .iter()
            .zip(self.cy.iter())
            .zip(identity.cx.iter().zip(identity.cy.iter()))
            .map(|((x, y), (ix, iy))| ((x - ix).powi(2) + (y - iy).powi(2)).sqrt())
            .sum();
        total / self.cx.len() as f64
    }
}
