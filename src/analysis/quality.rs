//! Blur, noise and resolution signals for an input image

use crate::{
    error::{CutoutError, Result},
    types::QualityMetrics,
    utils::imaging,
};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Thresholds and penalties for [`QualityAnalyzer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Laplacian variance below which the image counts as blurry
    pub blur_threshold: f32,
    /// Normalized noise score above which the image counts as noisy
    pub noise_threshold: f32,
    /// Residual standard deviation that maps to a noise score of 1.0
    pub noise_normalizer: f32,
    /// Minimum pixel count for an acceptable resolution
    pub min_resolution_pixels: u64,
    pub blur_penalty: f32,
    pub noise_penalty: f32,
    pub resolution_penalty: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            blur_threshold: 150.0,
            noise_threshold: 0.2,
            noise_normalizer: 32.0,
            min_resolution_pixels: 200 * 200,
            blur_penalty: 0.3,
            noise_penalty: 0.2,
            resolution_penalty: 0.3,
        }
    }
}

/// Computes [`QualityMetrics`] from a raw image
#[derive(Debug, Clone, Default)]
pub struct QualityAnalyzer {
    thresholds: QualityThresholds,
}

impl QualityAnalyzer {
    #[must_use]
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    /// Analyze an image; never fails
    ///
    /// Any internal failure yields [`QualityMetrics::neutral`].
    #[must_use]
    pub fn analyze(&self, image: &RgbImage) -> QualityMetrics {
        match self.try_analyze(image) {
            Ok(metrics) => metrics,
            Err(e) => {
                log::warn!("Quality analysis failed, using neutral metrics: {}", e);
                QualityMetrics::neutral()
            },
        }
    }

    fn try_analyze(&self, image: &RgbImage) -> Result<QualityMetrics> {
        let (w, h) = image.dimensions();
        if w < 3 || h < 3 {
            return Err(CutoutError::processing(format!(
                "Image {}x{} too small for quality analysis",
                w, h
            )));
        }
        let gray = imaging::luminance(image);
        let t = &self.thresholds;

        let blur_score = laplacian_variance(&gray);
        let noise_score = self.noise_score(&gray);
        let resolution_ok = u64::from(w) * u64::from(h) >= t.min_resolution_pixels;

        let mut score = 1.0f32;
        if blur_score < t.blur_threshold {
            score -= t.blur_penalty;
        }
        if noise_score > t.noise_threshold {
            score -= t.noise_penalty;
        }
        if !resolution_ok {
            score -= t.resolution_penalty;
        }

        let metrics = QualityMetrics {
            blur_score,
            noise_score,
            resolution_ok,
            composite_quality_score: score.clamp(0.0, 1.0),
        };
        log::debug!(
            "Quality: blur={:.1} noise={:.3} resolution_ok={} score={:.2}",
            metrics.blur_score,
            metrics.noise_score,
            metrics.resolution_ok,
            metrics.composite_quality_score
        );
        Ok(metrics)
    }

    /// Standard deviation of the high-frequency residual, normalized to [0, 1]
    fn noise_score(&self, gray: &GrayImage) -> f32 {
        let smoothed = imaging::gaussian(gray, 1.0);
        let residuals: Vec<f64> = gray
            .as_raw()
            .iter()
            .zip(smoothed.as_raw())
            .map(|(&a, &b)| f64::from(a) - f64::from(b))
            .collect();
        let n = residuals.len().max(1) as f64;
        let mean = residuals.iter().sum::<f64>() / n;
        let std = (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        (std as f32 / self.thresholds.noise_normalizer.max(f32::EPSILON)).clamp(0.0, 1.0)
    }
}

/// Variance of the 4-neighbour Laplacian
fn laplacian_variance(gray: &GrayImage) -> f32 {
    let laplacian = imageproc::filter::laplacian_filter(gray);
    let values = laplacian.as_raw();
    let n = values.len().max(1) as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    var as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(size: u32, cell: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn test_flat_small_image_is_penalized() {
        let analyzer = QualityAnalyzer::default();
        let image = RgbImage::from_pixel(50, 50, Rgb([128, 128, 128]));
        let metrics = analyzer.analyze(&image);
        assert!(!metrics.resolution_ok);
        assert!(metrics.blur_score < 1.0);
        // blur + low resolution penalties
        assert!((metrics.composite_quality_score - 0.4).abs() < 1e-5);
        assert!(metrics.is_low_quality());
    }

    #[test]
    fn test_sharp_large_image_scores_high() {
        let analyzer = QualityAnalyzer::default();
        let metrics = analyzer.analyze(&checkerboard(256, 16));
        assert!(metrics.resolution_ok);
        assert!(metrics.blur_score > 150.0);
        assert!(metrics.composite_quality_score >= 0.8);
    }

    #[test]
    fn test_tiny_image_returns_neutral() {
        let analyzer = QualityAnalyzer::default();
        let metrics = analyzer.analyze(&RgbImage::new(1, 1));
        assert_eq!(metrics, QualityMetrics::neutral());
    }

    #[test]
    fn test_score_floored_at_zero() {
        let thresholds = QualityThresholds {
            blur_penalty: 0.8,
            resolution_penalty: 0.8,
            ..QualityThresholds::default()
        };
        let analyzer = QualityAnalyzer::new(thresholds);
        let image = RgbImage::from_pixel(20, 20, Rgb([10, 10, 10]));
        let metrics = analyzer.analyze(&image);
        assert!(metrics.composite_quality_score.abs() < f32::EPSILON);
    }
}
