pub mod loader;
pub mod transformer;
pub mod volume;

pub use loader::*;
pub use transformer::*;
pub use volume::*;
