//! Shared image kernels used across pipeline stages
//!
//! Thin wrappers over `imageproc` plus the few passes it does not provide
//! (summed-area box means, component statistics). Every function accepts
//! degenerate sizes and returns an empty/neutral result instead of
//! panicking, since `imageproc` kernels index `1..width - 1`.

use image::{GrayImage, Luma, RgbImage, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Smallest side for which 3x3 kernels are meaningful
const MIN_KERNEL_SIDE: u32 = 3;

/// Luminance of an RGB image (ITU-R 601 weights, as `image` computes them)
#[must_use]
pub fn luminance(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Composite an RGBA image over white and drop the alpha channel
#[must_use]
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let alpha = u16::from(src[3]);
        let blend = |c: u8| -> u8 {
            ((u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        *dst = image::Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    out
}

/// Downscale so that the longest side is at most `max_side`
#[must_use]
pub fn shrink(image: &RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_side || max_side == 0 {
        return image.clone();
    }
    let scale = max_side as f32 / longest as f32;
    let nw = ((w as f32 * scale).round() as u32).max(1);
    let nh = ((h as f32 * scale).round() as u32).max(1);
    image::imageops::resize(image, nw, nh, image::imageops::FilterType::Triangle)
}

/// Canny edge map (255 on edges), empty for images too small for the kernel
#[must_use]
pub fn canny(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    if gray.width() < MIN_KERNEL_SIDE || gray.height() < MIN_KERNEL_SIDE {
        return GrayImage::new(gray.width(), gray.height());
    }
    imageproc::edges::canny(gray, low, high.max(low))
}

/// Fraction of non-zero pixels
#[must_use]
pub fn nonzero_fraction(image: &GrayImage) -> f32 {
    let total = image.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    image.as_raw().iter().filter(|&&v| v > 0).count() as f32 / total as f32
}

/// Sobel gradient magnitude per pixel
#[must_use]
pub fn sobel_magnitude(gray: &GrayImage) -> Vec<f32> {
    if gray.width() < MIN_KERNEL_SIDE || gray.height() < MIN_KERNEL_SIDE {
        return vec![0.0; gray.as_raw().len()];
    }
    imageproc::gradients::sobel_gradients(gray)
        .as_raw()
        .iter()
        .map(|&v| f32::from(v))
        .collect()
}

/// Gaussian blur, identity for non-positive sigma
#[must_use]
pub fn gaussian(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 || gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    imageproc::filter::gaussian_blur_f32(gray, sigma)
}

/// Morphological close with a square structuring element of radius `k`
#[must_use]
pub fn close(mask: &GrayImage, k: u8) -> GrayImage {
    if k == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::morphology::close(mask, Norm::LInf, k)
}

/// Morphological open with a square structuring element of radius `k`
#[must_use]
pub fn open(mask: &GrayImage, k: u8) -> GrayImage {
    if k == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::morphology::open(mask, Norm::LInf, k)
}

#[must_use]
pub fn erode(mask: &GrayImage, k: u8) -> GrayImage {
    if k == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::morphology::erode(mask, Norm::LInf, k)
}

#[must_use]
pub fn dilate(mask: &GrayImage, k: u8) -> GrayImage {
    if k == 0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::morphology::dilate(mask, Norm::LInf, k)
}

/// Chessboard distance of every pixel to the nearest non-zero pixel, saturating at 255
#[must_use]
pub fn distance_to_foreground(mask: &GrayImage) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::distance_transform::distance_transform(mask, Norm::LInf)
}

/// Otsu threshold level of a grayscale image
#[must_use]
pub fn otsu_level(gray: &GrayImage) -> u8 {
    if gray.as_raw().is_empty() {
        return 128;
    }
    imageproc::contrast::otsu_level(gray)
}

/// Threshold to {0, 255}: strictly above `threshold` is foreground
#[must_use]
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = gray.clone();
    for v in out.iter_mut() {
        *v = if *v > threshold { 255 } else { 0 };
    }
    out
}

/// Swap 0 and 255 in a binary image
#[must_use]
pub fn invert(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    for v in out.iter_mut() {
        *v = 255 - *v;
    }
    out
}

/// Mean and standard deviation of a set of luminance samples
#[must_use]
pub fn mean_std(values: &[u8]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, var.sqrt() as f32)
}

/// Box mean of a float field over a `(2r+1)^2` window, clamped at the borders
///
/// Uses a summed-area table so the cost is independent of `radius`.
#[must_use]
pub fn box_mean(data: &[f32], width: u32, height: u32, radius: u32) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || data.len() != w * h {
        return data.to_vec();
    }
    let stride = w + 1;
    let mut sat = vec![0.0f64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0.0f64;
        for x in 0..w {
            row_sum += f64::from(data.get(y * w + x).copied().unwrap_or(0.0));
            let above = sat.get(y * stride + x + 1).copied().unwrap_or(0.0);
            if let Some(cell) = sat.get_mut((y + 1) * stride + x + 1) {
                *cell = above + row_sum;
            }
        }
    }
    let r = radius as usize;
    let at = |x: usize, y: usize| sat.get(y * stride + x).copied().unwrap_or(0.0);
    let mut out = Vec::with_capacity(w * h);
    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let sum = at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0);
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            out.push((sum / count) as f32);
        }
    }
    out
}

/// Bounding box and size of one connected component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStats {
    pub label: u32,
    pub area: usize,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub touches_border: bool,
}

impl ComponentStats {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Longest bounding-box side over shortest
    #[must_use]
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = (self.width() as f32, self.height() as f32);
        w.max(h) / w.min(h).max(1.0)
    }

    #[must_use]
    pub fn minor_side(&self) -> u32 {
        self.width().min(self.height())
    }
}

/// Labelled connected components of the non-zero pixels of an image
#[derive(Debug, Clone)]
pub struct Components {
    width: u32,
    labels: Vec<u32>,
    stats: Vec<ComponentStats>,
}

impl Components {
    /// Label the 8-connected components of pixels with value above `threshold`
    #[must_use]
    pub fn label(image: &GrayImage, threshold: u8) -> Self {
        Self::label_with(image, threshold, Connectivity::Eight)
    }

    /// Label the 4-connected components of pixels with value above `threshold`
    #[must_use]
    pub fn label_four(image: &GrayImage, threshold: u8) -> Self {
        Self::label_with(image, threshold, Connectivity::Four)
    }

    fn label_with(image: &GrayImage, threshold: u8, connectivity: Connectivity) -> Self {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Self {
                width,
                labels: Vec::new(),
                stats: Vec::new(),
            };
        }
        let binary = binarize(image, threshold);
        let labelled = connected_components(&binary, connectivity, Luma([0u8]));
        let labels = labelled.into_raw();

        let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
        let mut slots: Vec<Option<ComponentStats>> = vec![None; max_label + 1];
        for (i, &label) in labels.iter().enumerate() {
            if label == 0 {
                continue;
            }
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            let on_border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
            if let Some(slot) = slots.get_mut(label as usize) {
                let entry = slot.get_or_insert(ComponentStats {
                    label,
                    area: 0,
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                    touches_border: false,
                });
                entry.area += 1;
                entry.min_x = entry.min_x.min(x);
                entry.min_y = entry.min_y.min(y);
                entry.max_x = entry.max_x.max(x);
                entry.max_y = entry.max_y.max(y);
                entry.touches_border |= on_border;
            }
        }

        Self {
            width,
            labels,
            stats: slots.into_iter().flatten().collect(),
        }
    }

    /// All components, in label order
    #[must_use]
    pub fn stats(&self) -> &[ComponentStats] {
        &self.stats
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Component with the largest area
    #[must_use]
    pub fn largest(&self) -> Option<&ComponentStats> {
        self.stats.iter().max_by_key(|s| s.area)
    }

    /// Label at a pixel, 0 for background
    #[must_use]
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        let idx = y as usize * self.width as usize + x as usize;
        self.labels.get(idx).copied().unwrap_or(0)
    }

    /// Per-pixel labels, row-major
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Binary image with 255 where the pixel belongs to `label`
    #[must_use]
    pub fn component_mask(&self, label: u32, height: u32) -> GrayImage {
        let data = self
            .labels
            .iter()
            .map(|&l| if l == label && label != 0 { 255 } else { 0 })
            .collect();
        GrayImage::from_raw(self.width, height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, height))
    }
}

/// Fill the interior of every component of `binary`: background regions that do not reach the border become foreground
#[must_use]
pub fn fill_enclosed(binary: &GrayImage) -> GrayImage {
    let background = Components::label_four(&invert(&binarize(binary, 127)), 127);
    let mut out = binarize(binary, 127);
    let enclosed: std::collections::HashSet<u32> = background
        .stats()
        .iter()
        .filter(|s| !s.touches_border)
        .map(|s| s.label)
        .collect();
    if enclosed.is_empty() {
        return out;
    }
    for (v, label) in out.iter_mut().zip(background.labels()) {
        if enclosed.contains(label) {
            *v = 255;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: u32, start: u32, end: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (start..end).contains(&x) && (start..end).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_flatten_on_white() {
        let rgba = RgbaImage::from_raw(2, 1, vec![0, 0, 0, 0, 10, 20, 30, 255]).unwrap();
        let rgb = flatten_on_white(&rgba);
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_shrink_preserves_aspect() {
        let image = RgbImage::new(800, 400);
        let small = shrink(&image, 256);
        assert_eq!(small.dimensions(), (256, 128));
        let untouched = shrink(&RgbImage::new(100, 50), 256);
        assert_eq!(untouched.dimensions(), (100, 50));
    }

    #[test]
    fn test_canny_degenerate_sizes() {
        let tiny = GrayImage::new(2, 2);
        assert_eq!(canny(&tiny, 50.0, 150.0).dimensions(), (2, 2));
        let empty = GrayImage::new(0, 0);
        assert!(canny(&empty, 50.0, 150.0).as_raw().is_empty());
    }

    #[test]
    fn test_canny_finds_square_outline() {
        let edges = canny(&square(40, 10, 30), 50.0, 150.0);
        let density = nonzero_fraction(&edges);
        assert!(density > 0.0 && density < 0.2);
    }

    #[test]
    fn test_components_stats() {
        let mut image = square(20, 2, 6);
        image.put_pixel(15, 15, Luma([255]));
        let components = Components::label(&image, 127);
        assert_eq!(components.stats().len(), 2);
        let largest = components.largest().unwrap();
        assert_eq!(largest.area, 16);
        assert_eq!((largest.width(), largest.height()), (4, 4));
        assert!(!largest.touches_border);
        assert_eq!(components.label_at(0, 0), 0);
        assert_eq!(components.label_at(3, 3), largest.label);
    }

    #[test]
    fn test_fill_enclosed_ring() {
        let mut ring = square(20, 4, 16);
        for y in 8..12 {
            for x in 8..12 {
                ring.put_pixel(x, y, Luma([0]));
            }
        }
        let filled = fill_enclosed(&ring);
        assert_eq!(filled.get_pixel(10, 10).0[0], 255);
        assert_eq!(filled.get_pixel(1, 1).0[0], 0);
    }

    #[test]
    fn test_box_mean_constant_field() {
        let data = vec![2.0f32; 25];
        let mean = box_mean(&data, 5, 5, 2);
        assert!(mean.iter().all(|&v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_box_mean_averages_neighbourhood() {
        let data = vec![0.0, 3.0, 0.0];
        let mean = box_mean(&data, 3, 1, 1);
        assert!((mean[1] - 1.0).abs() < 1e-5);
        assert!((mean[0] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[10, 10, 10]);
        assert!((mean - 10.0).abs() < 1e-5);
        assert!(std.abs() < 1e-5);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_distance_to_foreground() {
        let mut image = GrayImage::new(5, 1);
        image.put_pixel(0, 0, Luma([255]));
        let dist = distance_to_foreground(&image);
        assert_eq!(dist.get_pixel(0, 0).0[0], 0);
        assert_eq!(dist.get_pixel(3, 0).0[0], 3);
    }
}
