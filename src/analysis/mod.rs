//! Per-image analysis run before segmentation
//!
//! Quality signals, the product category and the resulting backend/flag
//! selection are all derived once per image and recorded in the result
//! metadata.

pub mod classifier;
pub mod quality;
pub mod selector;

pub use classifier::{ClassifierThresholds, ProductClassifier};
pub use quality::{QualityAnalyzer, QualityThresholds};
pub use selector::{ConfigSelector, SelectedConfig};
