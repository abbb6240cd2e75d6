//! Synthetic product shots and processor helpers shared by integration tests

#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use imgly_cutout::{BackendRegistry, CutoutProcessor, ProcessorConfig};
use std::sync::Arc;

pub const SIDE: u32 = 400;
pub const SQUARE: u32 = 100;
pub const GRAY: [u8; 3] = [128, 128, 128];

/// Bounds of the centered square, as `(start, end)` exclusive
pub fn square_bounds() -> (u32, u32) {
    let start = (SIDE - SQUARE) / 2;
    (start, start + SQUARE)
}

pub fn in_square(x: u32, y: u32) -> bool {
    let (start, end) = square_bounds();
    (start..end).contains(&x) && (start..end).contains(&y)
}

/// 400x400 white image with a centered 100x100 gray square
pub fn gray_square_on_white() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(SIDE, SIDE, |x, y| {
        if in_square(x, y) {
            Rgb(GRAY)
        } else {
            Rgb([255, 255, 255])
        }
    }))
}

/// The square scene as an already cut out, transparent-background image
pub fn transparent_square() -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(SIDE, SIDE, |x, y| {
        if in_square(x, y) {
            Rgba([GRAY[0], GRAY[1], GRAY[2], 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

/// Pixels at least `margin` away from the square's outline
pub fn well_inside(x: u32, y: u32, margin: u32) -> bool {
    let (start, end) = square_bounds();
    x >= start + margin && x + margin < end && y >= start + margin && y + margin < end
}

pub fn well_outside(x: u32, y: u32, margin: u32) -> bool {
    let (start, end) = square_bounds();
    x + margin < start || x >= end + margin || y + margin < start || y >= end + margin
}

/// Route `log` output to the test harness; `RUST_LOG=debug` shows pipeline decisions
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn processor(registry: BackendRegistry) -> CutoutProcessor {
    init_logging();
    CutoutProcessor::new(Arc::new(registry), ProcessorConfig::default())
}

pub fn processor_with(registry: BackendRegistry, config: ProcessorConfig) -> CutoutProcessor {
    init_logging();
    CutoutProcessor::new(Arc::new(registry), config)
}
