use instant::Instant;
use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

use super::{ElasticParams, ImagePair, RegistrationPrimitive};
use crate::error::{RegistrationError, Result};
use crate::transform::DeformationField;

/// Translation-only registration by FFT phase correlation.
///
/// The recovered shift is expressed as a B-spline field at the parameter
/// bundle's finest interval count, so it composes with everything else that
/// consumes deformation fields.
pub struct PhaseCorrelationRegistration;

impl RegistrationPrimitive for PhaseCorrelationRegistration {
    fn register_pair(&self, pair: &ImagePair<'_>, params: &ElasticParams) -> Result<DeformationField> {
        let start = Instant::now();

        if pair.target.dim() != pair.source.dim() {
            return Err(RegistrationError::primitive(format!(
                "target {:?} and source {:?} differ in size",
                pair.target.dim(),
                pair.source.dim()
            )));
        }
        let (height, width) = pair.target.dim();
        if height == 0 || width == 0 {
            return Err(RegistrationError::primitive("cannot register empty images"));
        }

        let target = to_complex("target", pair.target, pair.target_mask)?;
        let source = to_complex("source", pair.source, pair.source_mask)?;

        let target_fft = compute_2d_fft(&target, false);
        let source_fft = compute_2d_fft(&source, false);
        let cross_power = compute_cross_power_spectrum(&target_fft, &source_fft);
        let correlation = compute_2d_fft(&cross_power, true);

        let (peak_x, peak_y) = find_correlation_peak(&correlation);

        // handle wraparound
        let shift_x = if peak_x > width / 2 {
            peak_x as f64 - width as f64
        } else {
            peak_x as f64
        };
        let shift_y = if peak_y > height / 2 {
            peak_y as f64 - height as f64
        } else {
            peak_y as f64
        };

        tracing::trace!(
            shift_x,
            shift_y,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Phase correlation peak"
        );

        // target(u) = source(u - shift), so each target pixel samples source at u - shift
        DeformationField::translation(params.intervals(), width, height, -shift_x, -shift_y)
    }

    fn name(&self) -> &'static str {
        "PhaseCorrelation"
    }
}

fn to_complex(
    role: &str,
    image: &Array2<f32>,
    mask: Option<&Array2<bool>>,
) -> Result<Array2<Complex<f32>>> {
    match mask {
        Some(mask) if mask.dim() != image.dim() => Err(RegistrationError::primitive(format!(
            "{} mask {:?} differs in size from image {:?}",
            role,
            mask.dim(),
            image.dim()
        ))),
        Some(mask) => Ok(Array2::from_shape_fn(image.dim(), |idx| {
            if mask[idx] {
                Complex::new(image[idx], 0.0)
            } else {
                Complex::new(0.0, 0.0)
            }
        })),
        None => Ok(image.mapv(|v| Complex::new(v, 0.0))),
    }
}

fn compute_2d_fft(input: &Array2<Complex<f32>>, inverse: bool) -> Array2<Complex<f32>> {
    let (height, width) = input.dim();
    let mut result = input.clone();
    let mut planner = FftPlanner::new();

    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(width), planner.plan_fft_inverse(height))
    } else {
        (planner.plan_fft_forward(width), planner.plan_fft_forward(height))
    };

    let mut buffer = Vec::with_capacity(width.max(height));
    for mut row in result.rows_mut() {
        buffer.clear();
        buffer.extend(row.iter().copied());
        row_fft.process(&mut buffer);
        row.iter_mut().zip(&buffer).for_each(|(dst, src)| *dst = *src);
    }
    for mut col in result.columns_mut() {
        buffer.clear();
        buffer.extend(col.iter().copied());
        col_fft.process(&mut buffer);
        col.iter_mut().zip(&buffer).for_each(|(dst, src)| *dst = *src);
    }

    if inverse {
        let scale = (width * height) as f32;
        result.mapv_inplace(|v| v / scale);
    }
    result
}

fn compute_cross_power_spectrum(
    fft1: &Array2<Complex<f32>>,
    fft2: &Array2<Complex<f32>>,
) -> Array2<Complex<f32>> {
    Array2::from_shape_fn(fft1.dim(), |idx| {
        let product = fft1[idx] * fft2[idx].conj();
        let magnitude = product.norm();
        if magnitude > 1e-10 {
            product / magnitude
        } else {
            Complex::new(0.0, 0.0)
        }
    })
}

fn find_correlation_peak(correlation: &Array2<Complex<f32>>) -> (usize, usize) {
    let mut max_val = f32::NEG_INFINITY;
    let mut peak = (0, 0);

    for ((y, x), value) in correlation.indexed_iter() {
        let magnitude = value.re;
        if magnitude > max_val {
            max_val = magnitude;
            peak = (x, y);
        }
    }

    peak
}
