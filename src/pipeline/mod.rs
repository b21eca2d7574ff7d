//! Groupwise registration pipeline: worker pool, progress, averaging,
//! scheduling and replay.

pub mod applier;
pub mod averager;
pub mod cohort;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod types;

pub use applier::SequenceApplier;
pub use averager::PairwiseAverager;
pub use cohort::Cohort;
pub use pool::WorkerPool;
pub use progress::{ProgressEvent, ProgressMonitor, ProgressReporter, ProgressSink};
pub use scheduler::GroupwiseScheduler;
pub use types::*;
