//! Background color clustering
//!
//! Border and corner samples are clustered into a small palette; pixels
//! close to any palette color are background.

use super::FallbackTuning;
use crate::{
    error::{CutoutError, Result},
    types::Mask,
};
use image::RgbImage;

pub(crate) type Color = [f32; 3];

/// Squared Euclidean RGB distance
pub(crate) fn distance_sq(a: &Color, b: &Color) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Squared distance to the nearest palette entry
pub(crate) fn nearest_sq(color: &Color, palette: &[Color]) -> f32 {
    palette
        .iter()
        .map(|c| distance_sq(color, c))
        .fold(f32::INFINITY, f32::min)
}

pub(crate) fn to_color(pixel: &image::Rgb<u8>) -> Color {
    [
        f32::from(pixel[0]),
        f32::from(pixel[1]),
        f32::from(pixel[2]),
    ]
}

/// Deterministic k-means over RGB samples
///
/// Centers start at evenly spaced samples in luminance order, so repeated
/// runs on the same image give the same palette. Returns fewer than `k`
/// centers when there are fewer samples.
pub(crate) fn kmeans(samples: &[Color], k: usize, iterations: usize) -> Vec<Color> {
    if samples.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| {
        let la = 0.299 * a[0] + 0.587 * a[1] + 0.114 * a[2];
        let lb = 0.299 * b[0] + 0.587 * b[1] + 0.114 * b[2];
        la.total_cmp(&lb)
    });
    let k = k.min(sorted.len());
    let mut centers: Vec<Color> = (0..k)
        .filter_map(|i| sorted.get(i * sorted.len() / k + sorted.len() / (2 * k)).copied())
        .collect();

    for _ in 0..iterations {
        let mut sums = vec![[0.0f64; 3]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for sample in samples {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| distance_sq(sample, a).total_cmp(&distance_sq(sample, b)))
                .map_or(0, |(i, _)| i);
            if let (Some(sum), Some(count)) = (sums.get_mut(nearest), counts.get_mut(nearest)) {
                for (acc, &c) in sum.iter_mut().zip(sample) {
                    *acc += f64::from(c);
                }
                *count += 1;
            }
        }
        let mut moved = false;
        for ((center, sum), &count) in centers.iter_mut().zip(&sums).zip(&counts) {
            if count == 0 {
                continue;
            }
            let updated = sum.map(|s| (s / count as f64) as f32);
            if distance_sq(center, &updated) > 0.25 {
                moved = true;
            }
            *center = updated;
        }
        if !moved {
            break;
        }
    }
    centers
}

/// Corner patches plus the one-pixel border ring
fn border_samples(image: &RgbImage, corner_ratio: f32) -> Vec<Color> {
    let (w, h) = image.dimensions();
    let mut samples = Vec::new();
    let step = ((w + h) / 200).max(1) as usize;
    for x in (0..w).step_by(step) {
        samples.push(to_color(image.get_pixel(x, 0)));
        samples.push(to_color(image.get_pixel(x, h - 1)));
    }
    for y in (0..h).step_by(step) {
        samples.push(to_color(image.get_pixel(0, y)));
        samples.push(to_color(image.get_pixel(w - 1, y)));
    }
    let pw = ((w as f32 * corner_ratio) as u32).clamp(1, w);
    let ph = ((h as f32 * corner_ratio) as u32).clamp(1, h);
    for &(ox, oy) in &[(0, 0), (w - pw, 0), (0, h - ph), (w - pw, h - ph)] {
        for y in oy..oy + ph {
            for x in ox..ox + pw {
                samples.push(to_color(image.get_pixel(x, y)));
            }
        }
    }
    samples
}

/// Foreground is everything not explained by the border palette
pub fn segment(image: &RgbImage, tuning: &FallbackTuning) -> Result<Mask> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(CutoutError::processing("Color clustering needs a non-empty image"));
    }
    let samples = border_samples(image, tuning.corner_ratio);
    let palette = kmeans(&samples, tuning.palette_size, tuning.kmeans_iterations);
    if palette.is_empty() {
        return Err(CutoutError::processing("No background samples for clustering"));
    }

    // Adaptive radius from how tightly the border fits its own palette
    let distances: Vec<f32> = samples.iter().map(|s| nearest_sq(s, &palette).sqrt()).collect();
    let n = distances.len() as f32;
    let mean = distances.iter().sum::<f32>() / n;
    let std = (distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n).sqrt();
    let radius = (mean + tuning.palette_spread * std).clamp(tuning.palette_min_distance, tuning.palette_max_distance);
    let radius_sq = radius * radius;
    log::debug!(
        "Background palette of {} colors, radius {:.1}",
        palette.len(),
        radius
    );

    Ok(Mask::from_fn(w, h, |x, y| {
        if nearest_sq(&to_color(image.get_pixel(x, y)), &palette) > radius_sq {
            255
        } else {
            0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_kmeans_separates_two_clusters() {
        let mut samples = vec![[10.0, 10.0, 10.0]; 20];
        samples.extend(vec![[240.0, 240.0, 240.0]; 20]);
        let mut centers = kmeans(&samples, 2, 10);
        centers.sort_by(|a, b| a[0].total_cmp(&b[0]));
        assert_eq!(centers.len(), 2);
        assert!((centers[0][0] - 10.0).abs() < 1e-3);
        assert!((centers[1][0] - 240.0).abs() < 1e-3);
    }

    #[test]
    fn test_kmeans_caps_k_at_sample_count() {
        let samples = vec![[1.0, 2.0, 3.0]; 2];
        assert_eq!(kmeans(&samples, 5, 3).len(), 2);
        assert!(kmeans(&[], 5, 3).is_empty());
    }

    #[test]
    fn test_two_tone_background() {
        let image = RgbImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                Rgb([200, 30, 30])
            } else if y < 50 {
                Rgb([230, 230, 230])
            } else {
                Rgb([180, 200, 220])
            }
        });
        let mask = segment(&image, &FallbackTuning::default()).unwrap();
        assert_eq!(mask.get(50, 50), 255);
        assert_eq!(mask.get(5, 5), 0);
        assert_eq!(mask.get(5, 95), 0);
    }
}
