//! Classical segmentation used when no backend mask is acceptable
//!
//! Three independent methods produce candidate masks:
//!
//! - [`grabcut`]: seeded separation from a rectangle around the dominant edges
//! - [`palette`]: background color clustering from border samples
//! - [`contour`]: multi-scale edge contour fill
//!
//! Their majority vote is tried first, then each method on its own. The
//! first candidate accepted by the [`QualityGate`] wins. When none passes,
//! an Otsu threshold is used without gating.

pub mod contour;
pub mod grabcut;
pub mod palette;

use crate::{
    error::{CutoutError, Result},
    gate::{GateVerdict, QualityGate},
    types::{AcceptedStrategy, DiagnosticMasks, Mask},
    utils::imaging,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Classical method that produced a fallback mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMethod {
    MajorityVote,
    GrabCut,
    ColorClustering,
    EdgeContour,
}

impl FallbackMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MajorityVote => "majority_vote",
            Self::GrabCut => "grabcut",
            Self::ColorClustering => "color_clustering",
            Self::EdgeContour => "edge_contour",
        }
    }
}

impl std::fmt::Display for FallbackMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables shared by the fallback methods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTuning {
    pub canny_low: f32,
    pub canny_high: f32,
    /// Seed frame inset when no edge structure is found
    pub inset_ratio: f32,
    pub grabcut_iterations: usize,
    /// Cost of each disagreeing neighbour, in RGB distance units
    pub smoothness: f32,
    /// Upper bound on samples fed to each palette fit
    pub max_model_samples: usize,
    /// Palette size, at most five
    pub palette_size: usize,
    pub kmeans_iterations: usize,
    pub corner_ratio: f32,
    /// Standard deviations above the mean border fit distance
    pub palette_spread: f32,
    pub palette_min_distance: f32,
    pub palette_max_distance: f32,
    pub contour_close_radius: u8,
    pub vote_cleanup_radius: u8,
}

impl Default for FallbackTuning {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            inset_ratio: 0.1,
            grabcut_iterations: 5,
            smoothness: 8.0,
            max_model_samples: 20_000,
            palette_size: 5,
            kmeans_iterations: 10,
            corner_ratio: 0.05,
            palette_spread: 2.0,
            palette_min_distance: 20.0,
            palette_max_distance: 80.0,
            contour_close_radius: 2,
            vote_cleanup_radius: 1,
        }
    }
}

/// Mask chosen by the fallback chain
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub mask: Mask,
    pub strategy: AcceptedStrategy,
    /// Gate verdict, absent for the emergency threshold
    pub verdict: Option<GateVerdict>,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackChain {
    tuning: FallbackTuning,
    gate: QualityGate,
}

impl FallbackChain {
    #[must_use]
    pub fn new(tuning: FallbackTuning, gate: QualityGate) -> Self {
        Self { tuning, gate }
    }

    /// Produce a mask without any segmentation backend
    ///
    /// Fails only when even the emergency threshold cannot run, which the
    /// caller treats as a catastrophic failure.
    pub fn run(
        &self,
        image: &RgbImage,
        mut diagnostics: Option<&mut DiagnosticMasks>,
    ) -> Result<FallbackOutcome> {
        let mut candidates: Vec<(FallbackMethod, Mask)> = Vec::new();
        for method in [
            FallbackMethod::GrabCut,
            FallbackMethod::ColorClustering,
            FallbackMethod::EdgeContour,
        ] {
            match self.run_method(method, image) {
                Ok(mask) => candidates.push((method, mask)),
                Err(e) => log::warn!("Fallback method {} failed: {}", method, e),
            }
        }

        let masks: Vec<&Mask> = candidates.iter().map(|(_, m)| m).collect();
        let vote = if masks.is_empty() {
            None
        } else {
            match majority_vote(&masks, self.tuning.vote_cleanup_radius) {
                Ok(mask) => Some(mask),
                Err(e) => {
                    log::warn!("Majority vote failed: {}", e);
                    None
                },
            }
        };

        let ordered = vote
            .map(|mask| (FallbackMethod::MajorityVote, mask))
            .into_iter()
            .chain(candidates);
        for (method, mask) in ordered {
            if let Some(diag) = diagnostics.as_deref_mut() {
                diag.push(format!("fallback:{}", method), mask.clone());
            }
            let verdict = self.gate.evaluate(&mask);
            if verdict.passed() {
                log::info!("Fallback method {} accepted", method);
                return Ok(FallbackOutcome {
                    mask,
                    strategy: AcceptedStrategy::Fallback(method),
                    verdict: Some(verdict),
                });
            }
            log::debug!("Fallback method {} rejected: {}", method, verdict.reasons());
        }

        log::warn!("No fallback method passed the quality gate, using emergency threshold");
        let mask = emergency_otsu(image)?;
        if let Some(diag) = diagnostics.as_deref_mut() {
            diag.push("fallback:emergency", mask.clone());
        }
        Ok(FallbackOutcome {
            mask,
            strategy: AcceptedStrategy::Emergency,
            verdict: None,
        })
    }

    /// Run a single classical method
    pub fn run_method(&self, method: FallbackMethod, image: &RgbImage) -> Result<Mask> {
        match method {
            FallbackMethod::GrabCut => grabcut::segment(image, &self.tuning),
            FallbackMethod::ColorClustering => palette::segment(image, &self.tuning),
            FallbackMethod::EdgeContour => contour::segment(image, &self.tuning),
            FallbackMethod::MajorityVote => {
                let masks = [
                    grabcut::segment(image, &self.tuning)?,
                    palette::segment(image, &self.tuning)?,
                    contour::segment(image, &self.tuning)?,
                ];
                let refs: Vec<&Mask> = masks.iter().collect();
                majority_vote(&refs, self.tuning.vote_cleanup_radius)
            },
        }
    }
}

/// Pixel is foreground when more than half of the masks say so, then a close/open cleanup
pub fn majority_vote(masks: &[&Mask], cleanup_radius: u8) -> Result<Mask> {
    let first = masks
        .first()
        .ok_or_else(|| CutoutError::processing("Majority vote needs at least one mask"))?;
    for mask in masks {
        first.ensure_same_size(mask)?;
    }
    let (w, h) = first.dimensions();
    let needed = masks.len() / 2 + 1;
    let votes = Mask::from_fn(w, h, |x, y| {
        let count = masks.iter().filter(|m| m.get(x, y) >= 128).count();
        if count >= needed {
            255
        } else {
            0
        }
    });
    let cleaned = imaging::open(&imaging::close(votes.as_gray(), cleanup_radius), cleanup_radius);
    Ok(Mask::from_gray(cleaned))
}

/// Otsu threshold of luminance, foreground being the class rarer on the border
pub fn emergency_otsu(image: &RgbImage) -> Result<Mask> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(CutoutError::processing("Emergency threshold needs a non-empty image"));
    }
    let gray = imaging::luminance(image);
    let level = imaging::otsu_level(&gray);
    let bright = imaging::binarize(&gray, level);

    let mut border_total = 0usize;
    let mut border_bright = 0usize;
    for (x, y, p) in bright.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
            border_total += 1;
            if p[0] > 0 {
                border_bright += 1;
            }
        }
    }
    let mask = if border_bright * 2 > border_total {
        imaging::invert(&bright)
    } else {
        bright
    };
    log::debug!("Emergency Otsu threshold at level {}", level);
    Ok(Mask::from_gray(mask))
}
