//! Error types for registration runs.
//!
//! Every failure the library can produce is a variant of [`RegistrationError`].
//! Variants fall into the classes reported by [`RegistrationError::kind`], which is
//! what callers use to decide between "fix the inputs" and "retry the I/O".

use std::path::PathBuf;
use thiserror::Error;

use crate::data::Dims;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs or settings that can never succeed as given.
    Configuration,
    /// Reading or writing a file failed.
    Io,
    /// A worker failed or was interrupted while a stage was running.
    Interruption,
    /// The 2D registration primitive reported a failure.
    Primitive,
}

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Zero-sized or otherwise unusable volume geometry.
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// A volume does not share the geometry of the rest of its cohort.
    #[error("Dimension mismatch: volume {index} is {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: Dims,
        actual: Dims,
    },

    /// Parallel collections disagree in length.
    #[error("Count mismatch: expected {expected} entries, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A stage expected a volume that was not there.
    #[error("Missing volume {index} at stage {stage}")]
    MissingVolume { stage: String, index: usize },

    /// Deformation fields with different spline resolutions were combined.
    #[error("Interval mismatch: expected {expected} intervals, got {actual}")]
    IntervalMismatch { expected: usize, actual: usize },

    /// A transform sequence cannot be replayed against the given volume.
    #[error("Incompatible sequence: {0}")]
    IncompatibleSequence(String),

    /// A transform sequence slot was read before it was written.
    #[error("Incomplete sequence: no field for iteration {iteration}, plane {plane}")]
    IncompleteSequence { iteration: usize, plane: String },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// File system failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Slice image could not be decoded or encoded.
    #[error("Image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A sequence file is not in the expected binary layout.
    #[error("Malformed sequence file: {0}")]
    Format(String),

    /// A pool worker panicked or could not be scheduled.
    #[error("Worker {index} failed during {stage}: {reason}")]
    WorkerFailed {
        stage: String,
        index: usize,
        reason: String,
    },

    /// The 2D registration primitive could not produce a field.
    #[error("Registration primitive failed: {0}")]
    Primitive(String),

    /// Context wrapper naming the stage of the run that failed.
    #[error("Stage {stage} failed (iteration {iteration}, plane {plane}): {source}")]
    Stage {
        stage: String,
        iteration: usize,
        plane: String,
        #[source]
        source: Box<RegistrationError>,
    },
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid dimensions error.
    pub fn invalid_dimensions(msg: impl Into<String>) -> Self {
        Self::InvalidDimensions(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an incompatible sequence error.
    pub fn incompatible_sequence(msg: impl Into<String>) -> Self {
        Self::IncompatibleSequence(msg.into())
    }

    /// Create a malformed file error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create a primitive failure.
    pub fn primitive(msg: impl Into<String>) -> Self {
        Self::Primitive(msg.into())
    }

    /// Attach a file path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap this error with the stage it was raised in.
    pub fn in_stage(self, stage: &str, iteration: usize, plane: impl ToString) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            iteration,
            plane: plane.to_string(),
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through stage wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stage { source, .. } => source.kind(),
            Self::Io { .. } | Self::Image { .. } | Self::Format(_) => ErrorKind::Io,
            Self::WorkerFailed { .. } => ErrorKind::Interruption,
            Self::Primitive(_) => ErrorKind::Primitive,
            Self::InvalidDimensions(_)
            | Self::DimensionMismatch { .. }
            | Self::CountMismatch { .. }
            | Self::MissingVolume { .. }
            | Self::IntervalMismatch { .. }
            | Self::IncompatibleSequence(_)
            | Self::IncompleteSequence { .. }
            | Self::InvalidConfiguration(_) => ErrorKind::Configuration,
        }
    }

    /// The innermost error beneath any stage wrappers.
    pub fn root(&self) -> &RegistrationError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}
