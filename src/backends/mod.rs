//! Segmentation backends
//!
//! A backend turns an RGB image into a foreground mask estimate. Backends
//! are registered once in a [`BackendRegistry`] at startup; the registry is
//! then shared read-only (behind an `Arc`) by every processor and worker.
//!
//! - [`tract`]: pure Rust ONNX inference for saliency models (feature `tract`)
//! - [`mock`]: deterministic in-process backends for tests and benchmarks

pub mod mock;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "tract")]
pub use self::tract::TractSegmenter;

use crate::{
    error::{CutoutError, Result},
    types::BackendResult,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Known segmentation model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendId {
    #[serde(rename = "u2net")]
    U2Net,
    #[serde(rename = "u2netp")]
    U2NetP,
    #[serde(rename = "silueta")]
    Silueta,
    #[serde(rename = "isnet", alias = "isnet-general-use")]
    IsNet,
    #[serde(rename = "sam")]
    Sam,
    #[serde(rename = "tracer-b7", alias = "tracer_b7")]
    TracerB7,
}

impl BackendId {
    /// Retry order used when a backend's mask is rejected
    pub const PRIORITY: [BackendId; 6] = [
        BackendId::IsNet,
        BackendId::Sam,
        BackendId::U2Net,
        BackendId::Silueta,
        BackendId::U2NetP,
        BackendId::TracerB7,
    ];

    /// Canonical lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U2Net => "u2net",
            Self::U2NetP => "u2netp",
            Self::Silueta => "silueta",
            Self::IsNet => "isnet",
            Self::Sam => "sam",
            Self::TracerB7 => "tracer-b7",
        }
    }

    /// Model file stem looked up by [`BackendRegistry::discover`]
    #[must_use]
    pub fn model_file_stem(&self) -> &'static str {
        match self {
            Self::IsNet => "isnet-general-use",
            Self::TracerB7 => "tracer_b7",
            other => other.as_str(),
        }
    }

    /// Input geometry and normalization the model was trained with
    #[must_use]
    pub fn profile(&self) -> ModelProfile {
        const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
        const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
        match self {
            Self::U2Net | Self::U2NetP | Self::Silueta => ModelProfile {
                input_size: 320,
                normalization_mean: IMAGENET_MEAN,
                normalization_std: IMAGENET_STD,
            },
            Self::IsNet | Self::Sam => ModelProfile {
                input_size: 1024,
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
            Self::TracerB7 => ModelProfile {
                input_size: 640,
                normalization_mean: IMAGENET_MEAN,
                normalization_std: IMAGENET_STD,
            },
        }
    }

    /// Position in the retry priority order
    #[must_use]
    pub fn priority_rank(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|id| id == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u2net" => Ok(Self::U2Net),
            "u2netp" => Ok(Self::U2NetP),
            "silueta" => Ok(Self::Silueta),
            "isnet" | "isnet-general-use" => Ok(Self::IsNet),
            "sam" => Ok(Self::Sam),
            "tracer-b7" | "tracer_b7" => Ok(Self::TracerB7),
            other => Err(CutoutError::invalid_config(format!(
                "Unknown backend '{}'. Valid backends: u2net, u2netp, silueta, isnet, sam, tracer-b7",
                other
            ))),
        }
    }
}

/// Model input size and per-channel normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    /// Square input side in pixels
    pub input_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

/// A segmentation model exposed uniformly to the pipeline
pub trait SegmentationBackend: Send + Sync {
    /// Model family this backend implements
    fn id(&self) -> BackendId;

    /// Whether the backend can serve calls (weights loaded, runtime ready)
    fn is_available(&self) -> bool {
        true
    }

    /// Produce a mask estimate for `image`
    ///
    /// # Errors
    /// - Inference failures inside the model runtime
    /// - Output tensors that cannot be mapped back to the image
    fn segment(&self, image: &RgbImage) -> Result<BackendResult>;
}

/// Read-only set of loaded backends, one per [`BackendId`]
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn SegmentationBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}

impl BackendRegistry {
    /// Create an empty registry; the pipeline then relies on classical fallbacks only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, returning whether it was accepted
    ///
    /// Unavailable backends are logged and skipped. A later registration for
    /// the same id replaces the earlier one.
    pub fn register(&mut self, backend: Arc<dyn SegmentationBackend>) -> bool {
        let id = backend.id();
        if !backend.is_available() {
            log::warn!("Backend {} is unavailable, skipping registration", id);
            return false;
        }
        self.backends.retain(|existing| existing.id() != id);
        log::debug!("Registered segmentation backend {}", id);
        self.backends.push(backend);
        true
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_backend<B: SegmentationBackend + 'static>(mut self, backend: B) -> Self {
        self.register(Arc::new(backend));
        self
    }

    /// Look up a backend by id
    pub fn get(&self, id: BackendId) -> Result<Arc<dyn SegmentationBackend>> {
        self.backends
            .iter()
            .find(|b| b.id() == id)
            .cloned()
            .ok_or(CutoutError::BackendUnavailable(id))
    }

    #[must_use]
    pub fn contains(&self, id: BackendId) -> bool {
        self.backends.iter().any(|b| b.id() == id)
    }

    /// Registered ids, in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|b| b.id()).collect()
    }

    /// Registered ids in retry priority order
    #[must_use]
    pub fn ids_by_priority(&self) -> Vec<BackendId> {
        let mut ids = self.ids();
        ids.sort_by_key(BackendId::priority_rank);
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Load every model found in `dir` as a [`TractSegmenter`]
    ///
    /// Files are matched by [`BackendId::model_file_stem`] with an `.onnx`
    /// extension. Models that fail to load are logged and skipped; a
    /// missing directory yields an empty registry.
    #[cfg(feature = "tract")]
    pub fn discover<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        let mut registry = Self::new();
        for id in BackendId::PRIORITY {
            let path = dir.join(format!("{}.onnx", id.model_file_stem()));
            if !path.is_file() {
                log::debug!("No model file for {} at {}", id, path.display());
                continue;
            }
            match TractSegmenter::from_file(id, &path) {
                Ok(segmenter) => {
                    registry.register(Arc::new(segmenter));
                },
                Err(e) => {
                    log::warn!("Failed to load {} from {}: {}", id, path.display(), e);
                },
            }
        }
        log::info!(
            "Discovered {} segmentation backend(s) in {}",
            registry.len(),
            dir.display()
        );
        registry
    }

    /// Without an inference runtime compiled in, discovery finds nothing
    #[cfg(not(feature = "tract"))]
    pub fn discover<P: AsRef<Path>>(dir: P) -> Self {
        log::warn!(
            "Backend discovery in {} skipped: no inference runtime enabled",
            dir.as_ref().display()
        );
        Self::new()
    }
}
