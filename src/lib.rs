//! Groupwise orthogonal-plane elastic registration of 3D label volumes.
//!
//! A cohort of same-sized volumes is repeatedly resliced through the YZ, ZX
//! and XY planes. In each plane every volume's mean projection is registered
//! against every other volume's projection, the resulting 2D deformation
//! fields are averaged, and the average warps every slice of that volume.
//! Each volume's fields are recorded in a [`TransformSequence`] that can be
//! saved and replayed on companion volumes.

pub mod algorithms;
pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod transform;

pub use algorithms::{ElasticParams, ImagePair, PhaseCorrelationRegistration, RegistrationPrimitive};
pub use config::Config;
pub use data::{BitDepth, Calibration, Dims, Reslicer, Volume};
pub use error::{ErrorKind, RegistrationError, Result};
pub use pipeline::{Cohort, GroupwiseScheduler, RegistrationOutcome, SequenceApplier};
pub use transform::{DeformationField, OrthogonalPlane, TransformSequence};
