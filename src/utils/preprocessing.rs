//! Model input preparation and output mapping
//!
//! Saliency models take a square, normalized NCHW tensor. Images are
//! resized preserving aspect ratio and centered on a padded canvas; the
//! same geometry is inverted to map the model's prediction back onto the
//! original frame.

use crate::{
    backends::ModelProfile,
    error::{CutoutError, Result},
    types::Mask,
};
use image::{ImageBuffer, RgbImage};
use ndarray::Array4;

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Padding color for aspect ratio preservation (RGB)
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255], // White padding
        }
    }
}

/// Coordinate transformation between the original frame and the model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformation {
    /// Scale factor used during preprocessing
    pub scale: f32,
    /// X offset for centering
    pub offset_x: u32,
    /// Y offset for centering
    pub offset_y: u32,
    /// Canvas side in tensor coordinates
    pub canvas_size: u32,
}

impl CoordinateTransformation {
    /// Geometry for fitting `dimensions` into a square canvas of `canvas_size`
    pub fn fit(dimensions: (u32, u32), canvas_size: u32) -> Result<Self> {
        let (orig_width, orig_height) = dimensions;
        if orig_width == 0 || orig_height == 0 || canvas_size == 0 {
            return Err(CutoutError::processing(format!(
                "Cannot fit {}x{} into a {} canvas",
                orig_width, orig_height, canvas_size
            )));
        }

        let target_size_f32 = canvas_size as f32;
        let scale =
            (target_size_f32 / orig_width as f32).min(target_size_f32 / orig_height as f32);

        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, canvas_size);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, canvas_size);

        Ok(Self {
            scale,
            offset_x: (canvas_size - scaled_width) / 2,
            offset_y: (canvas_size - scaled_height) / 2,
            canvas_size,
        })
    }

    #[must_use]
    pub fn scaled_dimensions(&self, dimensions: (u32, u32)) -> (u32, u32) {
        (
            ((dimensions.0 as f32 * self.scale).round() as u32).clamp(1, self.canvas_size),
            ((dimensions.1 as f32 * self.scale).round() as u32).clamp(1, self.canvas_size),
        )
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for model inference
    ///
    /// This function handles:
    /// - Aspect ratio preserving resize
    /// - Center padding to the model's square input
    /// - Normalization to tensor format (NCHW)
    pub fn preprocess(
        image: &RgbImage,
        profile: &ModelProfile,
        options: &PreprocessingOptions,
    ) -> Result<(Array4<f32>, CoordinateTransformation)> {
        let target_size = profile.input_size;
        let transformation = CoordinateTransformation::fit(image.dimensions(), target_size)?;
        let (new_width, new_height) = transformation.scaled_dimensions(image.dimensions());

        // Resize image maintaining aspect ratio
        let resized = image::imageops::resize(
            image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        let padding = options.padding_color;
        let mut canvas = ImageBuffer::from_pixel(
            target_size,
            target_size,
            image::Rgb([padding[0], padding[1], padding[2]]),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(transformation.offset_x),
            i64::from(transformation.offset_y),
        );

        let target_size_usize: usize = target_size.try_into().map_err(|_| {
            CutoutError::processing(
                "Target size too large for usize conversion in tensor allocation",
            )
        })?;

        let tensor = Self::canvas_to_tensor(&canvas, profile, target_size_usize);
        Ok((tensor, transformation))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, profile: &ModelProfile, target_size: usize) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, target_size, target_size));

        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for c in 0..3 {
                    let mean = profile.normalization_mean.get(c).copied().unwrap_or(0.0);
                    let std = profile.normalization_std.get(c).copied().unwrap_or(1.0);
                    let value = f32::from(pixel.0.get(c).copied().unwrap_or(0)) / 255.0;
                    if let Some(slot) = tensor.get_mut([0, c, y, x]) {
                        *slot = (value - mean) / std;
                    }
                }
            }
        }

        tensor
    }

    /// Map a `[1, 1, H, W]` prediction back onto the original frame
    ///
    /// The prediction is min-max normalized over the canvas region the image
    /// occupied, so models with unbounded logits and models with sigmoid
    /// outputs produce comparable masks.
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
        transformation: &CoordinateTransformation,
    ) -> Result<Mask> {
        Self::validate_tensor_shape(tensor)?;
        let shape = tensor.shape();
        let mask_height = shape.get(2).copied().unwrap_or(0) as u32;
        let mask_width = shape.get(3).copied().unwrap_or(0) as u32;
        let (orig_width, orig_height) = original_dimensions;

        // Tensors smaller or larger than the canvas are sampled proportionally
        let sx = mask_width as f32 / transformation.canvas_size as f32;
        let sy = mask_height as f32 / transformation.canvas_size as f32;

        let mut values = Vec::with_capacity((orig_width * orig_height) as usize);
        for y in 0..orig_height {
            for x in 0..orig_width {
                let canvas_x = (x as f32 * transformation.scale).round() as u32 + transformation.offset_x;
                let canvas_y = (y as f32 * transformation.scale).round() as u32 + transformation.offset_y;
                let tensor_x = ((canvas_x as f32 * sx) as u32).min(mask_width.saturating_sub(1));
                let tensor_y = ((canvas_y as f32 * sy) as u32).min(mask_height.saturating_sub(1));
                let value = tensor
                    .get([0, 0, tensor_y as usize, tensor_x as usize])
                    .copied()
                    .unwrap_or(0.0);
                values.push(if value.is_finite() { value } else { 0.0 });
            }
        }

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        let data = values
            .into_iter()
            .map(|v| {
                let normalized = if range > f32::EPSILON {
                    (v - min) / range
                } else {
                    v.clamp(0.0, 1.0)
                };
                (normalized * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect();

        Mask::from_raw(orig_width, orig_height, data)
    }

    /// Validate tensor shape for mask generation
    fn validate_tensor_shape(tensor: &Array4<f32>) -> Result<()> {
        let shape = tensor.shape();
        if shape.first().copied().unwrap_or(0) != 1
            || shape.get(1).copied().unwrap_or(0) != 1
            || shape.get(2).copied().unwrap_or(0) == 0
            || shape.get(3).copied().unwrap_or(0) == 0
        {
            return Err(CutoutError::processing(format!(
                "Invalid output tensor shape {:?}",
                shape
            )));
        }
        Ok(())
    }
}
