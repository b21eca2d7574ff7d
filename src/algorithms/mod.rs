//! 2D registration primitives.
//!
//! The groupwise engine only ever talks to [`RegistrationPrimitive`]: give it a
//! target and a source image plus the elastic parameter bundle, get back the
//! deformation field that maps the source onto the target.

pub mod phase_correlation;

pub use phase_correlation::PhaseCorrelationRegistration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transform::DeformationField;

/// Registration strategy requested from the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    Fast,
    Accurate,
    /// Unidirectional, source onto target only.
    Mono,
}

/// Parameter bundle handed to every primitive call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticParams {
    pub mode: RegistrationMode,
    /// Images are downsampled by `2^subsample_factor` before registering.
    pub subsample_factor: u32,
    /// Coarsest multiresolution deformation scale (0 = very coarse).
    pub min_scale: u32,
    /// Finest multiresolution deformation scale (4 = super fine).
    pub max_scale: u32,
    pub divergence_weight: f64,
    pub curl_weight: f64,
    pub landmark_weight: f64,
    pub image_weight: f64,
    pub consistency_weight: f64,
    /// Convergence threshold on the relative cost change.
    pub stop_threshold: f64,
}

impl Default for ElasticParams {
    fn default() -> Self {
        Self {
            mode: RegistrationMode::Mono,
            subsample_factor: 0,
            min_scale: 0,
            max_scale: 2,
            divergence_weight: 0.0,
            curl_weight: 0.0,
            landmark_weight: 0.0,
            image_weight: 1.0,
            consistency_weight: 10.0,
            stop_threshold: 0.01,
        }
    }
}

impl ElasticParams {
    /// Spline interval count of fields at the finest scale.
    pub fn intervals(&self) -> usize {
        1usize << self.max_scale.min(16)
    }

    /// Every problem with the bundle, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.subsample_factor > 7 {
            errors.push("elastic.subsample_factor must be between 0 and 7".to_string());
        }
        if self.min_scale > 3 {
            errors.push("elastic.min_scale must be between 0 and 3".to_string());
        }
        if self.max_scale > 4 {
            errors.push("elastic.max_scale must be between 0 and 4".to_string());
        }
        if self.min_scale > self.max_scale {
            errors.push("elastic.min_scale must not exceed elastic.max_scale".to_string());
        }
        for (name, value) in [
            ("divergence_weight", self.divergence_weight),
            ("curl_weight", self.curl_weight),
            ("landmark_weight", self.landmark_weight),
            ("image_weight", self.image_weight),
            ("consistency_weight", self.consistency_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(format!("elastic.{} must be a non-negative number", name));
            }
        }
        if !(self.stop_threshold.is_finite() && self.stop_threshold > 0.0) {
            errors.push("elastic.stop_threshold must be positive".to_string());
        }
        errors
    }
}

/// Target and source image of one registration call, with optional masks.
#[derive(Debug, Clone, Copy)]
pub struct ImagePair<'a> {
    pub target: &'a Array2<f32>,
    pub source: &'a Array2<f32>,
    pub target_mask: Option<&'a Array2<bool>>,
    pub source_mask: Option<&'a Array2<bool>>,
}

impl<'a> ImagePair<'a> {
    pub fn new(target: &'a Array2<f32>, source: &'a Array2<f32>) -> Self {
        Self {
            target,
            source,
            target_mask: None,
            source_mask: None,
        }
    }

    pub fn with_masks(mut self, target: &'a Array2<bool>, source: &'a Array2<bool>) -> Self {
        self.target_mask = Some(target);
        self.source_mask = Some(source);
        self
    }
}

/// A 2D elastic registration capability.
///
/// Implementations must be deterministic: the same pair and parameters always
/// give the same field. The averager relies on this.
pub trait RegistrationPrimitive: Send + Sync {
    /// Compute the field mapping `pair.source` onto `pair.target`.
    fn register_pair(&self, pair: &ImagePair<'_>, params: &ElasticParams) -> Result<DeformationField>;

    fn name(&self) -> &'static str;
}
