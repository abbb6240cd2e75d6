//! Cheap heuristic categorization of product shots

use crate::{types::ProductCategory, utils::imaging};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Thresholds for [`ProductClassifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Longest side of the working copy
    pub analysis_max_side: u32,
    pub light_luminance: u8,
    pub light_fraction: f32,
    pub dark_luminance: u8,
    pub dark_fraction: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub edge_density: f32,
    /// Edge bounding box aspect ratio above which the shot counts as elongated
    pub elongated_aspect: f32,
    /// Edge bounding box minor side, relative to the shorter frame side
    pub elongated_minor_ratio: f32,
    pub corner_min_px: u32,
    pub corner_ratio: f32,
    pub corner_max_std: f32,
    pub corner_min_mean: f32,
    pub corner_max_mean: f32,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            analysis_max_side: 256,
            light_luminance: 220,
            light_fraction: 0.6,
            dark_luminance: 40,
            dark_fraction: 0.4,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_density: 0.10,
            elongated_aspect: 3.0,
            elongated_minor_ratio: 0.3,
            corner_min_px: 8,
            corner_ratio: 0.05,
            corner_max_std: 10.0,
            corner_min_mean: 40.0,
            corner_max_mean: 220.0,
        }
    }
}

/// Assigns a [`ProductCategory`] from global image statistics
#[derive(Debug, Clone, Default)]
pub struct ProductClassifier {
    thresholds: ClassifierThresholds,
}

impl ProductClassifier {
    #[must_use]
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    /// Classify an image; rules are checked in a fixed priority order
    #[must_use]
    pub fn classify(&self, image: &RgbImage) -> ProductCategory {
        let t = &self.thresholds;
        if image.width() == 0 || image.height() == 0 {
            return ProductCategory::Generic;
        }
        let gray = imaging::luminance(&imaging::shrink(image, t.analysis_max_side));
        let total = gray.as_raw().len() as f32;

        let light = gray
            .as_raw()
            .iter()
            .filter(|&&v| v > t.light_luminance)
            .count() as f32
            / total;
        if light > t.light_fraction {
            log::debug!("Classified as uniform light background ({:.2} bright)", light);
            return ProductCategory::UniformLightBackground;
        }

        let dark = gray
            .as_raw()
            .iter()
            .filter(|&&v| v < t.dark_luminance)
            .count() as f32
            / total;
        if dark > t.dark_fraction {
            log::debug!("Classified as dark product ({:.2} dark)", dark);
            return ProductCategory::DarkProduct;
        }

        if self.has_fine_structure(&gray) {
            return ProductCategory::FineStructure;
        }

        if self.has_solid_corners(&gray) {
            log::debug!("Classified as solid backdrop");
            return ProductCategory::SolidBackdrop;
        }

        ProductCategory::Generic
    }

    fn has_fine_structure(&self, gray: &GrayImage) -> bool {
        let t = &self.thresholds;
        let edges = imaging::canny(gray, t.canny_low, t.canny_high);
        let density = imaging::nonzero_fraction(&edges);
        if density > t.edge_density {
            log::debug!("Classified as fine structure (edge density {:.3})", density);
            return true;
        }

        let mut bbox: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in edges.enumerate_pixels() {
            if p[0] == 0 {
                continue;
            }
            bbox = Some(match bbox {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        let Some((x0, y0, x1, y1)) = bbox else {
            return false;
        };
        let (bw, bh) = ((x1 - x0 + 1) as f32, (y1 - y0 + 1) as f32);
        let aspect = bw.max(bh) / bw.min(bh);
        let minor = bw.min(bh);
        let frame_minor = gray.width().min(gray.height()) as f32;
        let elongated = aspect > t.elongated_aspect && minor < t.elongated_minor_ratio * frame_minor;
        if elongated {
            log::debug!(
                "Classified as fine structure (elongated edges, aspect {:.1})",
                aspect
            );
        }
        elongated
    }

    fn has_solid_corners(&self, gray: &GrayImage) -> bool {
        let t = &self.thresholds;
        let (w, h) = gray.dimensions();
        let pw = ((w as f32 * t.corner_ratio) as u32).max(t.corner_min_px).min(w);
        let ph = ((h as f32 * t.corner_ratio) as u32).max(t.corner_min_px).min(h);
        let origins = [(0, 0), (w - pw, 0), (0, h - ph), (w - pw, h - ph)];

        origins.iter().all(|&(ox, oy)| {
            let mut samples = Vec::with_capacity((pw * ph) as usize);
            for y in oy..oy + ph {
                for x in ox..ox + pw {
                    samples.push(gray.get_pixel(x, y)[0]);
                }
            }
            let (mean, std) = imaging::mean_std(&samples);
            std < t.corner_max_std && mean > t.corner_min_mean && mean < t.corner_max_mean
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn product_on(background: [u8; 3], product: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(200, 200, |x, y| {
            if (70..130).contains(&x) && (70..130).contains(&y) {
                Rgb(product)
            } else {
                Rgb(background)
            }
        })
    }

    #[test]
    fn test_white_background() {
        let classifier = ProductClassifier::default();
        let image = product_on([250, 250, 250], [90, 40, 20]);
        assert_eq!(
            classifier.classify(&image),
            ProductCategory::UniformLightBackground
        );
    }

    #[test]
    fn test_dark_scene() {
        let classifier = ProductClassifier::default();
        let image = product_on([10, 10, 10], [200, 180, 160]);
        assert_eq!(classifier.classify(&image), ProductCategory::DarkProduct);
    }

    #[test]
    fn test_gray_backdrop() {
        let classifier = ProductClassifier::default();
        let image = product_on([128, 128, 128], [200, 30, 30]);
        assert_eq!(classifier.classify(&image), ProductCategory::SolidBackdrop);
    }

    #[test]
    fn test_thin_wire_is_fine_structure() {
        let classifier = ProductClassifier::default();
        let image = RgbImage::from_fn(200, 200, |x, y| {
            if (20..180).contains(&x) && (98..102).contains(&y) {
                Rgb([20, 20, 20])
            } else {
                Rgb([128, 128, 128])
            }
        });
        assert_eq!(classifier.classify(&image), ProductCategory::FineStructure);
    }

    #[test]
    fn test_textured_corners_are_generic() {
        let classifier = ProductClassifier::default();
        let image = RgbImage::from_fn(200, 200, |x, y| {
            let v = (60 + (x * 7 + y * 13) % 120) as u8;
            Rgb([v, v, v])
        });
        let category = classifier.classify(&image);
        assert_ne!(category, ProductCategory::SolidBackdrop);
        assert_ne!(category, ProductCategory::UniformLightBackground);
    }

    #[test]
    fn test_empty_image_is_generic() {
        let classifier = ProductClassifier::default();
        assert_eq!(
            classifier.classify(&RgbImage::new(0, 0)),
            ProductCategory::Generic
        );
    }
}
