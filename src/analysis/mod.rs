//! Post-registration analysis of cohort volumes.

pub mod consensus;
pub mod merge;
pub mod projection;
pub mod sample;

pub use consensus::intersection;
pub use merge::{merge, MergedVolumes};
pub use projection::{BlockGrid, BlockSampler, Normalisation};
pub use sample::{BinIndex, BinSample, BinSampler, SampleTable, VolumeSamples};
