//! Topological cleanup of a segmentation mask
//!
//! Operates on the foreground interpretation `alpha >= 128` for all
//! component analysis and writes back into the (possibly continuous) mask,
//! so soft edges from the backend survive until binarization.

use crate::{
    error::Result,
    types::{Mask, ProductCategory},
    utils::imaging::{self, Components},
};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Foreground threshold shared by component analysis and binarization
const FOREGROUND: u8 = 128;

/// Tunables for [`MaskPostProcessor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessTuning {
    /// Holes must be larger than this many pixels
    pub hole_min_area: usize,
    /// Holes must be smaller than this fraction of the image
    pub hole_max_ratio: f32,
    /// In skip-small-details mode, holes narrower than this are kept
    pub small_detail_px: u32,
    /// Reattached components are smaller than this fraction of the main component
    pub thin_area_ratio: f32,
    pub thin_min_aspect: f32,
    pub thin_max_minor_px: u32,
    pub binary_threshold: u8,
    /// Radius of the close/open pair for light backgrounds
    pub halo_radius: u8,
}

impl Default for PostProcessTuning {
    fn default() -> Self {
        Self {
            hole_min_area: 50,
            hole_max_ratio: 0.3,
            small_detail_px: 6,
            thin_area_ratio: 0.005,
            thin_min_aspect: 4.0,
            thin_max_minor_px: 8,
            binary_threshold: FOREGROUND,
            halo_radius: 1,
        }
    }
}

/// Per-image switches for [`MaskPostProcessor::process`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessOptions {
    pub category: ProductCategory,
    pub preserve_holes: bool,
    pub force_binary_alpha: bool,
}

impl PostProcessOptions {
    /// Fine structures keep their narrow gaps
    #[must_use]
    pub fn skip_small_details(&self) -> bool {
        self.category == ProductCategory::FineStructure
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaskPostProcessor {
    tuning: PostProcessTuning,
}

impl MaskPostProcessor {
    #[must_use]
    pub fn new(tuning: PostProcessTuning) -> Self {
        Self { tuning }
    }

    /// Run hole handling, halo cleanup, thin reattachment and binarization
    ///
    /// `reference` is an IsNet mask used to transfer holes the primary
    /// backend filled in.
    pub fn process(
        &self,
        mask: &Mask,
        options: &PostProcessOptions,
        reference: Option<&Mask>,
    ) -> Result<Mask> {
        let mut out = mask.clone();

        if options.preserve_holes {
            out = self.cut_holes(&out, options.skip_small_details());
            if let Some(reference) = reference {
                out = self.transfer_reference_holes(&out, reference)?;
            }
        }

        out = self.clean_halo(&out, options.category);
        out = self.reattach_thin_components(mask, &out)?;

        if options.force_binary_alpha {
            out = self.binarize(&out);
        }
        Ok(out)
    }

    /// Zero interior background regions enclosed by the main object
    #[must_use]
    pub fn cut_holes(&self, mask: &Mask, skip_small_details: bool) -> Mask {
        let t = &self.tuning;
        let (w, h) = mask.dimensions();
        let foreground = Components::label(mask.as_gray(), FOREGROUND - 1);
        let Some(main) = foreground.largest() else {
            return mask.clone();
        };
        let filled = imaging::fill_enclosed(&foreground.component_mask(main.label, h));

        let background = Components::label_four(
            &imaging::invert(&imaging::binarize(mask.as_gray(), FOREGROUND - 1)),
            127,
        );
        let max_area = (t.hole_max_ratio * (w as f32 * h as f32)) as usize;
        let holes: HashSet<u32> = background
            .stats()
            .iter()
            .filter(|s| !s.touches_border)
            .filter(|s| s.area > t.hole_min_area && s.area < max_area)
            .filter(|s| {
                !(skip_small_details
                    && (s.width() < t.small_detail_px || s.height() < t.small_detail_px))
            })
            .map(|s| s.label)
            .collect();
        if holes.is_empty() {
            return mask.clone();
        }

        let mut out = mask.clone();
        let mut cut = 0usize;
        for ((value, label), inside) in out
            .data_mut()
            .iter_mut()
            .zip(background.labels())
            .zip(filled.as_raw())
        {
            if *inside == 255 && holes.contains(label) {
                *value = 0;
                cut += 1;
            }
        }
        log::debug!("Cut {} hole(s) totalling {} px", holes.len(), cut);
        out
    }

    /// Cut pixels the reference says are background inside the primary's main object
    pub fn transfer_reference_holes(&self, primary: &Mask, reference: &Mask) -> Result<Mask> {
        let reference = if reference.dimensions() == primary.dimensions() {
            reference.clone()
        } else {
            reference.resized(primary.width(), primary.height())
        };
        primary.ensure_same_size(&reference)?;

        let components = Components::label(primary.as_gray(), FOREGROUND - 1);
        let Some(main) = components.largest() else {
            return Ok(primary.clone());
        };
        let main_label = main.label;

        let mut out = primary.clone();
        let mut transferred = 0usize;
        for ((value, &label), &r) in out
            .data_mut()
            .iter_mut()
            .zip(components.labels())
            .zip(reference.data())
        {
            if label == main_label && *value >= FOREGROUND && r < FOREGROUND {
                *value = 0;
                transferred += 1;
            }
        }
        log::debug!("Transferred {} px of holes from reference mask", transferred);
        Ok(out)
    }

    /// Category-specific fringe removal
    #[must_use]
    pub fn clean_halo(&self, mask: &Mask, category: ProductCategory) -> Mask {
        let binary = imaging::binarize(mask.as_gray(), FOREGROUND - 1);
        let cleaned = match category {
            ProductCategory::UniformLightBackground => {
                let r = self.tuning.halo_radius;
                imaging::open(&imaging::close(&binary, r), r)
            },
            ProductCategory::FineStructure => dilate_2x2(&erode_2x2(&binary)),
            _ => return mask.clone(),
        };
        // Keep soft values where the cleanup agrees with the mask
        let mut out = mask.clone();
        for ((value, &before), &after) in out
            .data_mut()
            .iter_mut()
            .zip(binary.as_raw())
            .zip(cleaned.as_raw())
        {
            if before != after {
                *value = after;
            }
        }
        out
    }

    /// Restore small thin pieces the cleanup removed
    ///
    /// Foreground components of `original` (alpha at or above the binary
    /// threshold) other than the main one, smaller than the configured
    /// fraction of it and either elongated or narrow, are forced to 255 in
    /// `processed`. Faint backend noise below the threshold never comes back.
    pub fn reattach_thin_components(&self, original: &Mask, processed: &Mask) -> Result<Mask> {
        original.ensure_same_size(processed)?;
        let t = &self.tuning;
        let components =
            Components::label(original.as_gray(), t.binary_threshold.saturating_sub(1));
        let Some(main) = components.largest() else {
            return Ok(processed.clone());
        };
        let max_area = t.thin_area_ratio * main.area as f32;
        let thin: HashSet<u32> = components
            .stats()
            .iter()
            .filter(|s| s.label != main.label)
            .filter(|s| (s.area as f32) < max_area)
            .filter(|s| s.aspect_ratio() > t.thin_min_aspect || s.minor_side() < t.thin_max_minor_px)
            .map(|s| s.label)
            .collect();
        if thin.is_empty() {
            return Ok(processed.clone());
        }

        let mut out = processed.clone();
        for (value, label) in out.data_mut().iter_mut().zip(components.labels()) {
            if thin.contains(label) {
                *value = 255;
            }
        }
        log::debug!("Reattached {} thin component(s)", thin.len());
        Ok(out)
    }

    #[must_use]
    pub fn binarize(&self, mask: &Mask) -> Mask {
        mask.binarized(self.tuning.binary_threshold)
    }

    /// Gaussian feather of the alpha with kernel `2r + 1` and sigma `r / 3`
    #[must_use]
    pub fn feather(mask: &Mask, radius: u32) -> Mask {
        if radius == 0 {
            return mask.clone();
        }
        Mask::from_gray(imaging::gaussian(mask.as_gray(), radius as f32 / 3.0))
    }
}

/// Erode with a 2x2 element anchored at the top-left
fn erode_2x2(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    let on = |x: u32, y: u32| x < w && y < h && binary.get_pixel(x, y)[0] > 0;
    GrayImage::from_fn(w, h, |x, y| {
        if on(x, y) && on(x + 1, y) && on(x, y + 1) && on(x + 1, y + 1) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Dilate with the 2x2 element mirrored, so erode then dilate restores aligned shapes
fn dilate_2x2(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    let on = |x: Option<u32>, y: Option<u32>| match (x, y) {
        (Some(x), Some(y)) => binary.get_pixel(x, y)[0] > 0,
        _ => false,
    };
    GrayImage::from_fn(w, h, |x, y| {
        let (xm, ym) = (x.checked_sub(1), y.checked_sub(1));
        if on(Some(x), Some(y)) || on(xm, Some(y)) || on(Some(x), ym) || on(xm, ym) {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
