//! Tract segmentation backend
//!
//! Runs U²-Net family saliency models (and other single-output ONNX
//! segmentation models) with Tract, a pure Rust inference engine with no
//! external runtime dependencies.
//!
//! Tract offers several advantages:
//! - Pure Rust implementation (no C++ dependencies)
//! - Lightweight and portable
//! - Memory safe without FFI boundaries

use crate::{
    backends::{BackendId, ModelProfile, SegmentationBackend},
    error::{CutoutError, Result},
    types::BackendResult,
    utils::preprocessing::{ImagePreprocessor, PreprocessingOptions},
};
use image::RgbImage;
use ndarray::Array4;
use std::path::Path;
use tract_onnx::prelude::*;

// Use instant crate for cross-platform time compatibility
use instant::Instant;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Predictions below/above these bounds count as decisive for confidence
const DECISIVE_LOW: u8 = 26;
const DECISIVE_HIGH: u8 = 229;

/// Segmentation backend running an ONNX model through Tract
pub struct TractSegmenter {
    id: BackendId,
    profile: ModelProfile,
    model: TractModel,
}

impl std::fmt::Debug for TractSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractSegmenter")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl TractSegmenter {
    /// Load a model file for `id` using the model family's default profile
    pub fn from_file<P: AsRef<Path>>(id: BackendId, path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            CutoutError::model(format!("Failed to read model '{}': {}", path.display(), e))
        })?;
        Self::from_bytes(id, &data)
    }

    /// Load a model from memory using the model family's default profile
    pub fn from_bytes(id: BackendId, model_data: &[u8]) -> Result<Self> {
        Self::with_profile(id, id.profile(), model_data)
    }

    /// Load a model from memory with an explicit input profile
    pub fn with_profile(id: BackendId, profile: ModelProfile, model_data: &[u8]) -> Result<Self> {
        let load_start = Instant::now();
        log::info!(
            "Initializing Tract segmenter {} ({}x{} input)",
            id,
            profile.input_size,
            profile.input_size
        );

        let side = profile.input_size as usize;
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| CutoutError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .map_err(|e| CutoutError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| CutoutError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| CutoutError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "Tract segmenter {} ready in {}ms",
            id,
            load_start.elapsed().as_millis()
        );

        Ok(Self { id, profile, model })
    }

    #[must_use]
    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Run the model and return the first output as a `[1, 1, H, W]` array
    fn infer(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self
            .model
            .run(tvec![Tensor::from(input).into()])
            .map_err(|e| CutoutError::inference(format!("Tract inference failed: {e}")))?;

        // Multi-output saliency models put the fused prediction first
        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CutoutError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            CutoutError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = output_data.shape().to_vec();
        let (height, width) = match shape.as_slice() {
            [1, 1, h, w] | [1, h, w] => (*h, *w),
            other => {
                return Err(CutoutError::inference(format!(
                    "Unexpected output tensor shape {:?}",
                    other
                )))
            },
        };

        Array4::from_shape_vec(
            (1, 1, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| CutoutError::inference(format!("Failed to reshape output tensor: {e}")))
    }
}

impl SegmentationBackend for TractSegmenter {
    fn id(&self) -> BackendId {
        self.id
    }

    fn segment(&self, image: &RgbImage) -> Result<BackendResult> {
        let start = Instant::now();
        let (tensor, transformation) =
            ImagePreprocessor::preprocess(image, &self.profile, &PreprocessingOptions::default())?;
        let output = self.infer(tensor)?;
        let mask = ImagePreprocessor::tensor_to_mask(&output, image.dimensions(), &transformation)?;

        let decisive = mask
            .data()
            .iter()
            .filter(|&&v| v < DECISIVE_LOW || v > DECISIVE_HIGH)
            .count();
        let confidence = if mask.is_empty() {
            0.0
        } else {
            decisive as f32 / mask.len() as f32
        };

        log::debug!(
            "Tract {} segmented {}x{} in {}ms (confidence {:.3})",
            self.id,
            image.width(),
            image.height(),
            start.elapsed().as_millis(),
            confidence
        );

        Ok(BackendResult::new(mask, confidence, self.id))
    }
}
