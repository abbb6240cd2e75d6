//! Core types for cutout pipeline operations

use crate::{
    backends::BackendId,
    error::{CutoutError, Result},
    fallback::FallbackMethod,
    gate::GateVerdict,
};
use chrono::{DateTime, Utc};
use image::{GrayImage, Luma, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Single-channel 8-bit foreground mask
///
/// 0 is background and 255 foreground. Values are continuous while a mask
/// moves through fusion and refinement and binary after post-processing
/// when binary alpha is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    image: GrayImage,
}

impl Mask {
    /// Create an all-background mask
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    /// Create a mask with every pixel set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([value])),
        }
    }

    /// Wrap an existing grayscale image
    #[must_use]
    pub fn from_gray(image: GrayImage) -> Self {
        Self { image }
    }

    /// Create a mask from raw row-major data
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        GrayImage::from_raw(width, height, data)
            .map(Self::from_gray)
            .ok_or_else(|| {
                CutoutError::processing(format!(
                    "Mask data does not match dimensions {}x{}",
                    width, height
                ))
            })
    }

    /// Build a mask by evaluating `f` at every pixel
    pub fn from_fn<F: FnMut(u32, u32) -> u8>(width: u32, height: u32, mut f: F) -> Self {
        Self {
            image: GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Number of pixels in the mask
    #[must_use]
    pub fn len(&self) -> usize {
        self.image.as_raw().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alpha value at a pixel, 0 outside the mask
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.image.get_pixel_checked(x, y).map_or(0, |p| p.0[0])
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            pixel.0[0] = value;
        }
    }

    /// Raw row-major alpha values
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    #[must_use]
    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    #[must_use]
    pub fn into_gray(self) -> GrayImage {
        self.image
    }

    /// Fraction of pixels with alpha above 128
    #[must_use]
    pub fn coverage(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let foreground = self.data().iter().filter(|&&v| v > 128).count();
        foreground as f32 / self.len() as f32
    }

    /// Whether every alpha value is exactly 0 or 255
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.data().iter().all(|&v| v == 0 || v == 255)
    }

    /// Threshold to {0, 255}: values at or above `threshold` become foreground
    #[must_use]
    pub fn binarized(&self, threshold: u8) -> Self {
        self.map(|v| if v >= threshold { 255 } else { 0 })
    }

    /// Apply `f` to every alpha value
    #[must_use]
    pub fn map<F: Fn(u8) -> u8>(&self, f: F) -> Self {
        let data = self.data().iter().map(|&v| f(v)).collect();
        Self {
            image: GrayImage::from_raw(self.width(), self.height(), data)
                .unwrap_or_else(|| GrayImage::new(self.width(), self.height())),
        }
    }

    /// Pixel-wise minimum with another mask of the same size
    pub fn intersect(&self, other: &Mask) -> Result<Self> {
        self.ensure_same_size(other)?;
        let data = self
            .data()
            .iter()
            .zip(other.data())
            .map(|(&a, &b)| a.min(b))
            .collect();
        Self::from_raw(self.width(), self.height(), data)
    }

    /// Resize the mask to new dimensions
    #[must_use]
    pub fn resized(&self, new_width: u32, new_height: u32) -> Self {
        if self.dimensions() == (new_width, new_height) {
            return self.clone();
        }
        Self::from_gray(image::imageops::resize(
            &self.image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        ))
    }

    pub(crate) fn ensure_same_size(&self, other: &Mask) -> Result<()> {
        if self.dimensions() == other.dimensions() {
            Ok(())
        } else {
            Err(CutoutError::processing(format!(
                "Mask dimensions differ: {:?} vs {:?}",
                self.dimensions(),
                other.dimensions()
            )))
        }
    }

    /// Produce an RGBA cutout of `image` using this mask as alpha
    ///
    /// Fully transparent pixels get zeroed color channels so no background
    /// color bleeds into transparent regions.
    pub fn apply_to(&self, image: &RgbImage) -> Result<RgbaImage> {
        if image.dimensions() != self.dimensions() {
            return Err(CutoutError::processing(
                "Image and mask dimensions do not match",
            ));
        }
        let mut out = RgbaImage::new(image.width(), image.height());
        for ((dst, src), &alpha) in out.pixels_mut().zip(image.pixels()).zip(self.data()) {
            *dst = if alpha == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([src[0], src[1], src[2], alpha])
            };
        }
        Ok(out)
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.len();
        let foreground_pixels = self.data().iter().filter(|&&x| x > 128).count();
        let transition_pixels = self.data().iter().filter(|&&x| x > 0 && x < 255).count();
        let ratio = |n: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                n as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            transition_pixels,
            foreground_ratio: ratio(foreground_pixels),
        }
    }

    /// Save mask as PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Statistics about a mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    /// Pixels with alpha strictly between 0 and 255
    pub transition_pixels: usize,
    pub foreground_ratio: f32,
}

/// Heuristic category of a product shot, derived once per image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    /// Product on a bright, near-white background
    UniformLightBackground,
    /// Predominantly dark product or scene
    DarkProduct,
    /// Wires, handles, jewellery chains and other thin structures
    FineStructure,
    /// Product on a flat mid-tone studio backdrop
    SolidBackdrop,
    /// Anything else
    Generic,
}

impl std::fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UniformLightBackground => "uniform_light_background",
            Self::DarkProduct => "dark_product",
            Self::FineStructure => "fine_structure",
            Self::SolidBackdrop => "solid_backdrop",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Output of one segmentation backend call
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub mask: Mask,
    /// Backend's own confidence in its mask, in [0, 1]
    pub confidence: f32,
    pub backend_id: BackendId,
}

impl BackendResult {
    /// Create a result, clamping confidence into [0, 1]
    #[must_use]
    pub fn new(mask: Mask, confidence: f32, backend_id: BackendId) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            mask,
            confidence,
            backend_id,
        }
    }
}

/// Image quality signals computed once from the original image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Variance of the Laplacian of luminance; low values mean blur
    pub blur_score: f32,
    /// Normalized high-frequency residual, in [0, 1]
    pub noise_score: f32,
    pub resolution_ok: bool,
    /// 1.0 minus penalties, in [0, 1]
    pub composite_quality_score: f32,
}

impl QualityMetrics {
    /// Metrics used when analysis cannot run; downstream stages treat the image as acceptable
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            blur_score: 150.0,
            noise_score: 0.1,
            resolution_ok: true,
            composite_quality_score: 0.7,
        }
    }

    #[must_use]
    pub fn is_low_quality(&self) -> bool {
        self.composite_quality_score < 0.6
    }

    /// At least one penalty was applied
    #[must_use]
    pub fn needs_enhancement(&self) -> bool {
        self.composite_quality_score < 0.8
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Which path produced the accepted mask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AcceptedStrategy {
    /// A single backend passed the gate
    Backend(BackendId),
    /// Several backends were fused and the fused mask passed the gate
    Ensemble(Vec<BackendId>),
    /// A classical method passed the gate
    Fallback(FallbackMethod),
    /// Otsu threshold, accepted without gating
    Emergency,
    /// Every strategy failed; the input was returned fully opaque
    Unprocessed,
}

impl AcceptedStrategy {
    /// Whether the gate was skipped for this result
    #[must_use]
    pub fn bypassed_gate(&self) -> bool {
        matches!(self, Self::Emergency | Self::Unprocessed)
    }
}

impl std::fmt::Display for AcceptedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(id) => write!(f, "backend:{}", id),
            Self::Ensemble(ids) => {
                let names: Vec<&str> = ids.iter().map(BackendId::as_str).collect();
                write!(f, "ensemble:{}", names.join("+"))
            },
            Self::Fallback(method) => write!(f, "fallback:{}", method),
            Self::Emergency => f.write_str("emergency"),
            Self::Unprocessed => f.write_str("unprocessed"),
        }
    }
}

/// Named intermediate masks collected when debug masks are requested
#[derive(Debug, Clone, Default)]
pub struct DiagnosticMasks {
    entries: Vec<(String, Mask)>,
}

impl DiagnosticMasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<S: Into<String>>(&mut self, name: S, mask: Mask) {
        self.entries.push((name.into(), mask));
    }

    /// Look up the most recent mask recorded under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Mask> {
        self.entries
            .iter()
            .rev()
            .find(|(entry, _)| entry == name)
            .map(|(_, mask)| mask)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every mask as `NN_<name>.png` into `dir`, returning the paths written
    pub fn save_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<std::path::PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.entries.len());
        for (index, (name, mask)) in self.entries.iter().enumerate() {
            let file_name = format!("{:02}_{}.png", index, name.replace([':', '/'], "_"));
            let path = dir.join(file_name);
            mask.save_png(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Per-stage timing breakdown in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Quality analysis, classification and configuration selection
    pub analysis_ms: u64,
    /// All backend calls, including retries
    pub segmentation_ms: u64,
    pub fusion_ms: u64,
    pub postprocessing_ms: u64,
    pub refinement_ms: u64,
    pub fallback_ms: u64,
    pub composition_ms: u64,
    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Time not attributed to any stage
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured = self.analysis_ms
            + self.segmentation_ms
            + self.fusion_ms
            + self.postprocessing_ms
            + self.refinement_ms
            + self.fallback_ms
            + self.composition_ms;
        self.total_ms.saturating_sub(measured)
    }
}

/// Metadata about one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub category: ProductCategory,
    pub quality: QualityMetrics,
    pub strategy: AcceptedStrategy,
    /// Backends invoked, in call order
    pub attempted_backends: Vec<BackendId>,
    /// Gate rejections that led to another backend being tried
    pub retries: u32,
    /// Verdict for the accepted mask, absent when the gate was bypassed
    pub gate_verdict: Option<GateVerdict>,
    /// Compositing failed and a white background was used instead
    pub composition_degraded: bool,
    pub timings: ProcessingTimings,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingMetadata {
    #[must_use]
    pub fn new(category: ProductCategory, quality: QualityMetrics) -> Self {
        Self {
            category,
            quality,
            strategy: AcceptedStrategy::Unprocessed,
            attempted_backends: Vec::new(),
            retries: 0,
            gate_verdict: None,
            composition_degraded: false,
            timings: ProcessingTimings::default(),
            processed_at: Utc::now(),
        }
    }
}

/// Result of a cutout operation
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Final RGBA image, same dimensions as the input
    pub image: RgbaImage,
    /// Final mask before compositing
    pub mask: Mask,
    /// Intermediate masks, present when debug masks were requested
    pub diagnostics: Option<DiagnosticMasks>,
    pub metadata: ProcessingMetadata,
}

impl ProcessingResult {
    /// Save the result as PNG with alpha channel
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// Encode the result as PNG bytes
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        self.image.write_to(&mut cursor, image::ImageFormat::Png)?;
        Ok(buffer)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        let m = &self.metadata;
        format!(
            "{}x{} category={} strategy={} coverage={:.3} retries={} total={}ms",
            self.image.width(),
            self.image.height(),
            m.category,
            m.strategy,
            self.mask.coverage(),
            m.retries,
            m.timings.total_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_creation_and_access() {
        let mut mask = Mask::new(4, 3);
        assert_eq!(mask.dimensions(), (4, 3));
        assert_eq!(mask.len(), 12);
        mask.set(1, 2, 200);
        assert_eq!(mask.get(1, 2), 200);
        assert_eq!(mask.get(10, 10), 0);
    }

    #[test]
    fn test_mask_from_raw_rejects_bad_length() {
        assert!(Mask::from_raw(2, 2, vec![0, 1, 2]).is_err());
        assert!(Mask::from_raw(2, 2, vec![0, 1, 2, 3]).is_ok());
    }

    #[test]
    fn test_mask_coverage_and_binarize() {
        let mask = Mask::from_raw(2, 2, vec![0, 127, 128, 255]).unwrap();
        assert!((mask.coverage() - 0.25).abs() < f32::EPSILON);

        let binary = mask.binarized(128);
        assert_eq!(binary.data(), &[0, 0, 255, 255]);
        assert!(binary.is_binary());
        assert!(!mask.is_binary());
    }

    #[test]
    fn test_mask_intersect() {
        let a = Mask::from_raw(2, 1, vec![255, 100]).unwrap();
        let b = Mask::from_raw(2, 1, vec![50, 200]).unwrap();
        assert_eq!(a.intersect(&b).unwrap().data(), &[50, 100]);

        let c = Mask::new(3, 1);
        assert!(a.intersect(&c).is_err());
    }

    #[test]
    fn test_apply_zeroes_transparent_color() {
        let image = RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30]));
        let mask = Mask::from_raw(2, 1, vec![0, 255]).unwrap();
        let rgba = mask.apply_to(&image).unwrap();
        assert_eq!(rgba.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(rgba.get_pixel(1, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_mask_statistics() {
        let mask = Mask::from_raw(4, 1, vec![0, 60, 200, 255]).unwrap();
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert_eq!(stats.background_pixels, 2);
        assert_eq!(stats.transition_pixels, 2);
    }

    #[test]
    fn test_backend_result_clamps_confidence() {
        let result = BackendResult::new(Mask::new(1, 1), 1.7, BackendId::U2Net);
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
        let result = BackendResult::new(Mask::new(1, 1), f32::NAN, BackendId::U2Net);
        assert!(result.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_quality_metrics_neutral() {
        let metrics = QualityMetrics::neutral();
        assert!(metrics.resolution_ok);
        assert!(!metrics.is_low_quality());
        assert!(metrics.needs_enhancement());
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(
            AcceptedStrategy::Backend(BackendId::IsNet).to_string(),
            "backend:isnet"
        );
        assert_eq!(
            AcceptedStrategy::Ensemble(vec![BackendId::IsNet, BackendId::U2Net]).to_string(),
            "ensemble:isnet+u2net"
        );
        assert!(AcceptedStrategy::Emergency.bypassed_gate());
        assert!(!AcceptedStrategy::Backend(BackendId::Sam).bypassed_gate());
    }

    #[test]
    fn test_diagnostics_save_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut diagnostics = DiagnosticMasks::new();
        diagnostics.push("backend:isnet", Mask::filled(3, 3, 255));
        diagnostics.push("final", Mask::new(3, 3));

        let written = diagnostics.save_to_dir(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.exists()));
        assert!(diagnostics.get("final").is_some());
        assert_eq!(diagnostics.names().collect::<Vec<_>>(), vec!["backend:isnet", "final"]);
    }

    #[test]
    fn test_timings_overhead() {
        let timings = ProcessingTimings {
            analysis_ms: 5,
            segmentation_ms: 50,
            total_ms: 70,
            ..ProcessingTimings::default()
        };
        assert_eq!(timings.other_overhead_ms(), 15);
    }
}
