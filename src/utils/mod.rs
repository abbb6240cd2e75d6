//! Shared image helpers
//!
//! - [`imaging`]: mask morphology, filters and connected components
//! - [`preprocessing`]: model input tensors and mask mapping

pub mod imaging;
pub mod preprocessing;

pub use imaging::{ComponentStats, Components};
pub use preprocessing::{CoordinateTransformation, ImagePreprocessor, PreprocessingOptions};
