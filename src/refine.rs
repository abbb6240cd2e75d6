//! Edge refinement of a post-processed mask
//!
//! Four passes, each of which may fail independently: a failing pass is
//! logged and the mask from the previous pass carries on.
//!
//! 1. Guided filter with the image luminance as guide
//! 2. Bilateral filter on the alpha
//! 3. Gaussian smoothing of transition pixels
//! 4. Distance-based falloff replacing hard 0/255 jumps

use crate::{
    error::{CutoutError, Result},
    types::Mask,
    utils::imaging,
};
use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

/// Tunables for [`EdgeRefiner`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementTuning {
    pub guided_radius: u32,
    pub guided_eps: f32,
    /// Stronger regularization for low-quality input
    pub guided_eps_low_quality: f32,
    /// Odd bilateral window side
    pub bilateral_window: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    pub transition_sigma: f32,
    /// Sobel magnitude band, exclusive, that marks transition pixels
    pub transition_low: f32,
    pub transition_high: f32,
    pub falloff_px: u8,
    pub binary_threshold: u8,
}

impl Default for RefinementTuning {
    fn default() -> Self {
        Self {
            guided_radius: 8,
            guided_eps: 1e-3,
            guided_eps_low_quality: 1e-2,
            bilateral_window: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            transition_sigma: 1.0,
            transition_low: 10.0,
            transition_high: 100.0,
            falloff_px: 3,
            binary_threshold: 128,
        }
    }
}

/// Per-image switches for [`EdgeRefiner::refine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefineOptions {
    pub low_quality: bool,
    pub force_binary_alpha: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeRefiner {
    tuning: RefinementTuning,
}

impl EdgeRefiner {
    #[must_use]
    pub fn new(tuning: RefinementTuning) -> Self {
        Self { tuning }
    }

    /// Run every refinement pass, skipping the ones that fail
    #[must_use]
    pub fn refine(&self, mask: &Mask, image: &RgbImage, options: RefineOptions) -> Mask {
        let guide = imaging::luminance(image);
        let eps = if options.low_quality {
            self.tuning.guided_eps_low_quality
        } else {
            self.tuning.guided_eps
        };

        let mut current = mask.clone();
        current = run_step("guided filter", current, |m| self.guided_filter(m, &guide, eps));
        current = run_step("bilateral filter", current, |m| self.bilateral(m));
        current = run_step("transition smoothing", current, |m| self.smooth_transitions(m));
        current = run_step("edge falloff", current, |m| self.soften_hard_jumps(m));

        if options.force_binary_alpha {
            current = current.binarized(self.tuning.binary_threshold);
        }
        current
    }

    /// Edge-preserving smoothing of the mask steered by the guide image
    pub fn guided_filter(&self, mask: &Mask, guide: &GrayImage, eps: f32) -> Result<Mask> {
        if guide.dimensions() != mask.dimensions() {
            return Err(CutoutError::processing(format!(
                "Guide {:?} and mask {:?} differ in size",
                guide.dimensions(),
                mask.dimensions()
            )));
        }
        if eps.is_nan() || eps <= 0.0 {
            return Err(CutoutError::invalid_config("Guided filter epsilon must be positive"));
        }
        let (w, h) = mask.dimensions();
        let r = self.tuning.guided_radius;
        let i: Vec<f32> = guide.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
        let p: Vec<f32> = mask.data().iter().map(|&v| f32::from(v) / 255.0).collect();
        let ip: Vec<f32> = i.iter().zip(&p).map(|(a, b)| a * b).collect();
        let ii: Vec<f32> = i.iter().map(|a| a * a).collect();

        let mean_i = imaging::box_mean(&i, w, h, r);
        let mean_p = imaging::box_mean(&p, w, h, r);
        let corr_ip = imaging::box_mean(&ip, w, h, r);
        let corr_ii = imaging::box_mean(&ii, w, h, r);

        let mut a = Vec::with_capacity(p.len());
        let mut b = Vec::with_capacity(p.len());
        for (((&mi, &mp), &cip), &cii) in mean_i.iter().zip(&mean_p).zip(&corr_ip).zip(&corr_ii) {
            let var_i = cii - mi * mi;
            let cov_ip = cip - mi * mp;
            let ak = cov_ip / (var_i + eps);
            a.push(ak);
            b.push(mp - ak * mi);
        }
        let mean_a = imaging::box_mean(&a, w, h, r);
        let mean_b = imaging::box_mean(&b, w, h, r);

        let data = i
            .iter()
            .zip(mean_a.iter().zip(&mean_b))
            .map(|(iv, (ma, mb))| to_alpha(ma * iv + mb))
            .collect();
        Mask::from_raw(w, h, data)
    }

    /// Bilateral filter of the alpha with Gaussian space and range weights
    pub fn bilateral(&self, mask: &Mask) -> Result<Mask> {
        let t = &self.tuning;
        if t.bilateral_window == 0 || t.bilateral_window % 2 == 0 {
            return Err(CutoutError::invalid_config(format!(
                "Bilateral window must be odd, got {}",
                t.bilateral_window
            )));
        }
        if t.bilateral_sigma_color.is_nan()
            || t.bilateral_sigma_space.is_nan()
            || t.bilateral_sigma_color <= 0.0
            || t.bilateral_sigma_space <= 0.0
        {
            return Err(CutoutError::invalid_config("Bilateral sigmas must be positive"));
        }
        let radius = (t.bilateral_window / 2) as i64;
        let (w, h) = (i64::from(mask.width()), i64::from(mask.height()));

        let range_lut: Vec<f32> = (0..256)
            .map(|d| {
                let d = d as f32;
                (-(d * d) / (2.0 * t.bilateral_sigma_color.powi(2))).exp()
            })
            .collect();
        let mut spatial = Vec::new();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let d2 = (dx * dx + dy * dy) as f32;
                spatial.push((dx, dy, (-d2 / (2.0 * t.bilateral_sigma_space.powi(2))).exp()));
            }
        }

        let src = mask.data();
        let at = |x: i64, y: i64| src.get((y * w + x) as usize).copied().unwrap_or(0);
        let mut out = Vec::with_capacity(src.len());
        for y in 0..h {
            for x in 0..w {
                let center = at(x, y);
                let mut sum = 0.0f32;
                let mut norm = 0.0f32;
                for &(dx, dy, ws) in &spatial {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let v = at(nx, ny);
                    let wr = range_lut
                        .get(usize::from(v.abs_diff(center)))
                        .copied()
                        .unwrap_or(0.0);
                    sum += ws * wr * f32::from(v);
                    norm += ws * wr;
                }
                out.push(if norm > 0.0 {
                    (sum / norm).round().clamp(0.0, 255.0) as u8
                } else {
                    center
                });
            }
        }
        Mask::from_raw(mask.width(), mask.height(), out)
    }

    /// Replace transition pixels with their Gaussian-smoothed value
    pub fn smooth_transitions(&self, mask: &Mask) -> Result<Mask> {
        let t = &self.tuning;
        let magnitude = imaging::sobel_magnitude(mask.as_gray());
        let smoothed = imaging::gaussian(mask.as_gray(), t.transition_sigma);
        let mut out = mask.clone();
        let mut touched = 0usize;
        for ((value, &m), &s) in out
            .data_mut()
            .iter_mut()
            .zip(&magnitude)
            .zip(smoothed.as_raw())
        {
            if m > t.transition_low && m < t.transition_high {
                *value = s;
                touched += 1;
            }
        }
        log::trace!("Smoothed {} transition pixels", touched);
        Ok(out)
    }

    /// Turn hard 0/255 steps into a linear falloff across the boundary
    ///
    /// Only pixels that are still exactly 0 or 255 within the falloff band
    /// of a hard step are changed; soft edges from earlier passes are kept.
    pub fn soften_hard_jumps(&self, mask: &Mask) -> Result<Mask> {
        let band = self.tuning.falloff_px;
        if band == 0 {
            return Ok(mask.clone());
        }
        let (w, h) = mask.dimensions();
        let seeds = GrayImage::from_fn(w, h, |x, y| {
            let v = mask.get(x, y);
            if v != 0 && v != 255 {
                return Luma([0]);
            }
            let opposite = 255 - v;
            let neighbours = [
                x.checked_sub(1).map(|nx| (nx, y)),
                (x + 1 < w).then_some((x + 1, y)),
                y.checked_sub(1).map(|ny| (x, ny)),
                (y + 1 < h).then_some((x, y + 1)),
            ];
            let jump = neighbours
                .iter()
                .flatten()
                .any(|&(nx, ny)| mask.get(nx, ny) == opposite);
            Luma([if jump { 255 } else { 0 }])
        });
        if seeds.as_raw().iter().all(|&v| v == 0) {
            return Ok(mask.clone());
        }

        let near_jump = imaging::distance_to_foreground(&seeds);
        let binary = imaging::binarize(mask.as_gray(), 127);
        let to_foreground = imaging::distance_to_foreground(&binary);
        let to_background = imaging::distance_to_foreground(&imaging::invert(&binary));
        let span = 2.0 * f32::from(band);

        let mut out = mask.clone();
        for (idx, value) in out.data_mut().iter_mut().enumerate() {
            let near = near_jump.as_raw().get(idx).copied().unwrap_or(u8::MAX);
            if near >= band || (*value != 0 && *value != 255) {
                continue;
            }
            let signed = if *value == 255 {
                f32::from(to_background.as_raw().get(idx).copied().unwrap_or(band)) - 0.5
            } else {
                0.5 - f32::from(to_foreground.as_raw().get(idx).copied().unwrap_or(band))
            };
            *value = to_alpha(0.5 + signed / span);
        }
        Ok(out)
    }
}

fn run_step<F>(name: &str, mask: Mask, step: F) -> Mask
where
    F: FnOnce(&Mask) -> Result<Mask>,
{
    match step(&mask) {
        Ok(refined) => refined,
        Err(e) => {
            log::warn!("Edge refinement step '{}' skipped: {}", name, e);
            mask
        },
    }
}

fn to_alpha(v: f32) -> u8 {
    if v.is_finite() {
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    } else {
        0
    }
}
