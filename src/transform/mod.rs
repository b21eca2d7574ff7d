//! Deformation fields and the per-volume sequences that record them.

pub mod bspline;
pub mod codec;
pub mod sequence;

pub use bspline::DeformationField;
pub use codec::{load_sequence, save_sequence};
pub use sequence::{OrthogonalPlane, TransformSequence};
