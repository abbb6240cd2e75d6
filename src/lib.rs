#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY Cutout Library
//!
//! Background removal for product photography. A single call classifies the
//! product, picks a segmentation backend, cleans up and refines the mask,
//! checks it against a quality gate and composites the result over a
//! transparent, solid or picture background.
//!
//! ## Pipeline
//!
//! 1. **Analysis**: blur, noise and resolution scores plus a product category
//! 2. **Segmentation**: one backend, or a fused ensemble on the `ultra` preset
//! 3. **Post-processing**: hole cutting, halo cleanup, thin part reattachment
//! 4. **Refinement**: guided and bilateral filtering of the alpha edges
//! 5. **Quality gate**: coverage and edge density checks, retrying other
//!    backends on rejection
//! 6. **Fallbacks**: classical segmentation when no backend mask passes
//! 7. **Composition**: the requested background
//!
//! Only invalid input and invalid settings produce an error. Everything
//! else degrades gracefully and is recorded in
//! [`ProcessingMetadata`](types::ProcessingMetadata).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_cutout::{BackendRegistry, CutoutProcessor, ProcessingSettings, ProcessorConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! // Load every saliency model found in a directory
//! let registry = BackendRegistry::discover("models");
//! let processor = CutoutProcessor::new(Arc::new(registry), ProcessorConfig::default());
//!
//! let settings = ProcessingSettings::builder()
//!     .background_color("#FFFFFF")
//!     .feather_radius(2)
//!     .build()?;
//! let image = image::open("product.jpg")?;
//! let result = processor.process(&image, &settings, None)?;
//! result.save_png("product_cutout.png")?;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tract` (default): pure Rust ONNX inference for the saliency models
//! - `tracing-init`: subscriber setup helpers in [`tracing_config`]
//! - `tracing-json`: JSON output for `tracing-init`
//! - `webp-support`: WebP background pictures
//!
//! Without `tract` the registry is filled with custom
//! [`SegmentationBackend`] implementations, or left empty to run on the
//! classical fallbacks only.

pub mod analysis;
pub mod backends;
pub mod batch;
pub mod compositor;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fusion;
pub mod gate;
pub mod postprocess;
pub mod processor;
pub mod refine;
pub mod services;
#[cfg(feature = "tracing-init")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use analysis::{ConfigSelector, ProductClassifier, QualityAnalyzer, SelectedConfig};
pub use backends::{BackendId, BackendRegistry, ModelProfile, SegmentationBackend};
#[cfg(feature = "tract")]
pub use backends::TractSegmenter;
pub use batch::{BatchItemOutcome, BatchProcessor, BatchReport};
pub use compositor::{parse_hex_color, BackgroundSource, Compositor, FsBackgroundSource};
pub use config::{
    BackendSelection, BackgroundMode, PipelineTuning, ProcessingSettings,
    ProcessingSettingsBuilder, ProcessorConfig, ProcessorConfigBuilder, QualityPreset,
};
pub use error::{CutoutError, Result};
pub use fallback::{FallbackChain, FallbackMethod};
pub use gate::{GateRejection, GateVerdict, QualityGate};
pub use processor::CutoutProcessor;
pub use services::{
    BatchProgress, CallbackProgressReporter, ConsoleProgressReporter, NoOpProgressReporter,
    ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use types::{
    AcceptedStrategy, BackendResult, DiagnosticMasks, Mask, ProcessingMetadata,
    ProcessingResult, ProcessingTimings, ProductCategory, QualityMetrics,
};

#[cfg(feature = "tracing-init")]
pub use tracing_config::{init_library_tracing, TracingConfig, TracingFormat};
