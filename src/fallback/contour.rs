//! Multi-scale edge contour fill

use super::FallbackTuning;
use crate::{
    error::{CutoutError, Result},
    types::Mask,
    utils::imaging::{self, Components},
};
use image::{imageops::FilterType, GrayImage};

/// Canny edges at full and half scale, merged at full scale
fn multiscale_edges(gray: &GrayImage, tuning: &FallbackTuning) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut edges = imaging::canny(gray, tuning.canny_low, tuning.canny_high);
    let (hw, hh) = (w / 2, h / 2);
    if hw >= 3 && hh >= 3 {
        let half = image::imageops::resize(gray, hw, hh, FilterType::Triangle);
        let half_edges = imaging::canny(&half, tuning.canny_low, tuning.canny_high);
        let upscaled = image::imageops::resize(&half_edges, w, h, FilterType::Nearest);
        for (e, &u) in edges.iter_mut().zip(upscaled.as_raw()) {
            *e = (*e).max(u);
        }
    }
    edges
}

/// Fill the largest region enclosed by the closed edge map
pub fn segment(image: &image::RgbImage, tuning: &FallbackTuning) -> Result<Mask> {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return Err(CutoutError::processing(format!(
            "Contour fill needs at least 3x3 pixels, got {}x{}",
            w, h
        )));
    }
    let gray = imaging::luminance(image);
    let edges = multiscale_edges(&gray, tuning);
    let closed = imaging::close(&edges, tuning.contour_close_radius);
    let filled = imaging::fill_enclosed(&closed);

    let components = Components::label(&filled, 127);
    let largest = components
        .largest()
        .ok_or_else(|| CutoutError::processing("No closed contour found"))?;
    log::debug!(
        "Contour fill kept component of {} px ({}x{})",
        largest.area,
        largest.width(),
        largest.height()
    );
    Ok(Mask::from_gray(components.component_mask(largest.label, h)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_fills_closed_outline() {
        let image = RgbImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                Rgb([40, 40, 40])
            } else {
                Rgb([220, 220, 220])
            }
        });
        let mask = segment(&image, &FallbackTuning::default()).unwrap();
        assert_eq!(mask.get(50, 50), 255);
        assert_eq!(mask.get(5, 5), 0);
        assert!(mask.coverage() > 0.12 && mask.coverage() < 0.25);
    }

    #[test]
    fn test_flat_image_has_no_contour() {
        let image = RgbImage::from_pixel(50, 50, Rgb([90, 90, 90]));
        assert!(segment(&image, &FallbackTuning::default()).is_err());
    }
}
