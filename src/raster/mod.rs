//! Pure raster comparison.

pub mod diff;

pub use diff::{diff, DiffResult};
