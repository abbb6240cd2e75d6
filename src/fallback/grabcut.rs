//! Seeded foreground/background separation
//!
//! A rectangle around the dominant edge structure seeds the labelling:
//! everything outside is certain background, everything inside starts as
//! probable foreground. Each iteration refits a color palette per label and
//! relabels the rectangle by palette distance plus a neighbour agreement
//! term.

use super::{
    palette::{kmeans, nearest_sq, to_color, Color},
    FallbackTuning,
};
use crate::{
    error::{CutoutError, Result},
    types::Mask,
    utils::imaging::{self, Components},
};
use image::RgbImage;

/// Inclusive pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Rect {
    fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// Rectangle around the largest Canny edge component, or an inset frame
pub(crate) fn seed_rect(image: &RgbImage, tuning: &FallbackTuning) -> Rect {
    let (w, h) = image.dimensions();
    let edges = imaging::canny(&imaging::luminance(image), tuning.canny_low, tuning.canny_high);
    let components = Components::label(&edges, 0);
    if let Some(dominant) = components.largest() {
        if dominant.width() > 2 && dominant.height() > 2 {
            return Rect {
                min_x: dominant.min_x,
                min_y: dominant.min_y,
                max_x: dominant.max_x,
                max_y: dominant.max_y,
            };
        }
    }
    let ix = (w as f32 * tuning.inset_ratio) as u32;
    let iy = (h as f32 * tuning.inset_ratio) as u32;
    Rect {
        min_x: ix.min(w.saturating_sub(1)),
        min_y: iy.min(h.saturating_sub(1)),
        max_x: w.saturating_sub(1 + ix).max(ix.min(w.saturating_sub(1))),
        max_y: h.saturating_sub(1 + iy).max(iy.min(h.saturating_sub(1))),
    }
}

fn palette_of(image: &RgbImage, labels: &[bool], want: bool, tuning: &FallbackTuning) -> Vec<Color> {
    let step = (labels.len() / tuning.max_model_samples.max(1)).max(1);
    let samples: Vec<Color> = image
        .pixels()
        .zip(labels)
        .step_by(step)
        .filter(|(_, &l)| l == want)
        .map(|(p, _)| to_color(p))
        .collect();
    kmeans(&samples, tuning.palette_size, tuning.kmeans_iterations)
}

pub fn segment(image: &RgbImage, tuning: &FallbackTuning) -> Result<Mask> {
    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return Err(CutoutError::processing(format!(
            "Seeded separation needs at least 3x3 pixels, got {}x{}",
            w, h
        )));
    }
    let rect = seed_rect(image, tuning);
    let mut labels: Vec<bool> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| rect.contains(x, y))
        .collect();
    if labels.iter().all(|&l| l) {
        return Err(CutoutError::processing(
            "Seed rectangle covers the whole image, no background to learn from",
        ));
    }

    let colors: Vec<Color> = image.pixels().map(to_color).collect();
    let (wu, hu) = (w as usize, h as usize);
    for iteration in 0..tuning.grabcut_iterations {
        let fg_palette = palette_of(image, &labels, true, tuning);
        let bg_palette = palette_of(image, &labels, false, tuning);
        if fg_palette.is_empty() || bg_palette.is_empty() {
            break;
        }

        let previous = labels.clone();
        let mut changed = 0usize;
        for y in rect.min_y..=rect.max_y {
            for x in rect.min_x..=rect.max_x {
                let idx = y as usize * wu + x as usize;
                let Some(color) = colors.get(idx) else {
                    continue;
                };
                let cost_fg = nearest_sq(color, &fg_palette).sqrt();
                let cost_bg = nearest_sq(color, &bg_palette).sqrt();

                let mut fg_neighbours = 0i32;
                let mut bg_neighbours = 0i32;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (i64::from(x) + dx, i64::from(y) + dy);
                        if nx < 0 || ny < 0 || nx as usize >= wu || ny as usize >= hu {
                            continue;
                        }
                        match previous.get(ny as usize * wu + nx as usize) {
                            Some(true) => fg_neighbours += 1,
                            Some(false) => bg_neighbours += 1,
                            None => {},
                        }
                    }
                }
                // Each disagreeing neighbour costs `smoothness`
                let energy_fg = cost_fg + tuning.smoothness * bg_neighbours as f32;
                let energy_bg = cost_bg + tuning.smoothness * fg_neighbours as f32;
                let is_fg = energy_fg < energy_bg;
                if let Some(label) = labels.get_mut(idx) {
                    if *label != is_fg {
                        changed += 1;
                    }
                    *label = is_fg;
                }
            }
        }
        log::trace!("Seeded separation iteration {}: {} px changed", iteration, changed);
        if changed == 0 {
            break;
        }
    }

    let data = labels.into_iter().map(|l| if l { 255 } else { 0 }).collect();
    Mask::from_raw(w, h, data)
}
