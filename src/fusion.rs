//! Confidence-weighted ensemble of backend masks
//!
//! Pixels where every backend agrees are snapped to 0 or 255. Where they
//! disagree near an edge, backends that see a strong edge at that pixel get
//! more say.

use crate::{
    error::{CutoutError, Result},
    types::{BackendResult, Mask},
    utils::imaging,
};

/// Every backend below this alpha means certain background
const AGREE_BACKGROUND: u8 = 50;
/// Every backend above this alpha means certain foreground
const AGREE_FOREGROUND: u8 = 200;
/// Smoothed edge strength above which a disagreement pixel is re-weighted
const EDGE_STRENGTH: f32 = 10.0;
const EDGE_SIGMA: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnsembleFusion;

impl EnsembleFusion {
    /// Fuse one or more backend results into a single mask
    ///
    /// Masks whose size differs from the first one are resized to match it.
    pub fn fuse(results: &[BackendResult]) -> Result<Mask> {
        let first = results
            .first()
            .ok_or_else(|| CutoutError::processing("Ensemble fusion needs at least one mask"))?;
        if results.len() == 1 {
            return Ok(first.mask.clone());
        }
        let (w, h) = first.mask.dimensions();
        let masks: Vec<Mask> = results
            .iter()
            .map(|r| {
                if r.mask.dimensions() == (w, h) {
                    r.mask.clone()
                } else {
                    r.mask.resized(w, h)
                }
            })
            .collect();

        let weights = Self::normalized_weights(results);
        let edges: Vec<Vec<u8>> = masks
            .iter()
            .map(|m| {
                let canny = imaging::canny(m.as_gray(), 50.0, 150.0);
                imaging::gaussian(&canny, EDGE_SIGMA).into_raw()
            })
            .collect();

        let mut fused = Vec::with_capacity(masks.first().map_or(0, Mask::len));
        for i in 0..(w as usize * h as usize) {
            let alphas: Vec<u8> = masks
                .iter()
                .map(|m| m.data().get(i).copied().unwrap_or(0))
                .collect();

            if alphas.iter().all(|&a| a < AGREE_BACKGROUND) {
                fused.push(0);
                continue;
            }
            if alphas.iter().all(|&a| a > AGREE_FOREGROUND) {
                fused.push(255);
                continue;
            }

            let strengths: Vec<f32> = edges
                .iter()
                .map(|e| f32::from(e.get(i).copied().unwrap_or(0)))
                .collect();
            let strongest = strengths.iter().copied().fold(0.0f32, f32::max);

            let value = if strongest > EDGE_STRENGTH {
                let local: Vec<f32> = weights
                    .iter()
                    .zip(&strengths)
                    .map(|(w, e)| w * (e + 1.0))
                    .collect();
                let total: f32 = local.iter().sum();
                weighted_average(&alphas, &local, total)
            } else {
                weighted_average(&alphas, &weights, 1.0)
            };
            fused.push(value);
        }

        log::debug!(
            "Fused {} masks ({})",
            results.len(),
            results
                .iter()
                .map(|r| format!("{}:{:.2}", r.backend_id, r.confidence))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Mask::from_raw(w, h, fused)
    }

    /// Confidences scaled to sum to one; equal weights when they sum to zero
    fn normalized_weights(results: &[BackendResult]) -> Vec<f32> {
        let total: f32 = results.iter().map(|r| r.confidence).sum();
        if total <= f32::EPSILON {
            let equal = 1.0 / results.len() as f32;
            return vec![equal; results.len()];
        }
        results.iter().map(|r| r.confidence / total).collect()
    }
}

fn weighted_average(alphas: &[u8], weights: &[f32], total: f32) -> u8 {
    if total <= f32::EPSILON {
        return 0;
    }
    let sum: f32 = alphas
        .iter()
        .zip(weights)
        .map(|(&a, &w)| f32::from(a) * w)
        .sum();
    (sum / total).round().clamp(0.0, 255.0) as u8
}
