//! Background replacement
//!
//! The foreground is alpha-composited over a solid color or a picture. Any
//! failure while preparing the background degrades to white instead of
//! failing the request.

use crate::{
    config::{BackgroundMode, ProcessingSettings},
    error::{CutoutError, Result},
};
use image::{imageops::FilterType, DynamicImage, RgbImage, Rgba, RgbaImage};
use std::path::Path;

/// Aspect ratio difference from which backgrounds are center-cropped before resizing
const CROP_ASPECT_TOLERANCE: f32 = 0.1;

const WHITE: [u8; 3] = [255, 255, 255];

/// Parse `#RGB` / `#RRGGBB`, with or without the leading `#`
///
/// ```rust
/// use imgly_cutout::compositor::parse_hex_color;
///
/// assert_eq!(parse_hex_color("#0f0").unwrap(), [0, 255, 0]);
/// assert_eq!(parse_hex_color("FF8000").unwrap(), [255, 128, 0]);
/// ```
pub fn parse_hex_color(color: &str) -> Result<[u8; 3]> {
    let hex = color.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    let invalid = || {
        CutoutError::invalid_config(format!(
            "Invalid color '{}': expected #RGB or #RRGGBB",
            color
        ))
    };
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (slot, i) in rgb.iter_mut().zip(0..3) {
                let digit = hex.get(i..=i).ok_or_else(invalid)?;
                *slot = channel(digit)? * 17;
            }
            Ok(rgb)
        },
        6 => Ok([
            channel(hex.get(0..2).ok_or_else(invalid)?)?,
            channel(hex.get(2..4).ok_or_else(invalid)?)?,
            channel(hex.get(4..6).ok_or_else(invalid)?)?,
        ]),
        _ => Err(invalid()),
    }
}

/// Loads background pictures for [`BackgroundMode::Image`]
pub trait BackgroundSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<DynamicImage>;
}

/// Reads backgrounds from the filesystem with `image::open`
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBackgroundSource;

impl BackgroundSource for FsBackgroundSource {
    fn load(&self, path: &Path) -> Result<DynamicImage> {
        image::open(path).map_err(|e| {
            CutoutError::composition(format!(
                "Failed to load background '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Output of [`Compositor::compose`]
#[derive(Debug, Clone)]
pub struct Composition {
    pub image: RgbaImage,
    /// The requested background could not be used and white was substituted
    pub degraded: bool,
}

pub struct Compositor {
    source: Box<dyn BackgroundSource>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor").finish_non_exhaustive()
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(Box::new(FsBackgroundSource))
    }
}

impl Compositor {
    #[must_use]
    pub fn new(source: Box<dyn BackgroundSource>) -> Self {
        Self { source }
    }

    /// Apply the requested background to an RGBA cutout
    #[must_use]
    pub fn compose(&self, cutout: &RgbaImage, settings: &ProcessingSettings) -> Composition {
        let background = match settings.background_mode {
            BackgroundMode::Remove => {
                return Composition {
                    image: cutout.clone(),
                    degraded: false,
                }
            },
            BackgroundMode::Color => settings
                .background_color
                .as_deref()
                .ok_or_else(|| CutoutError::composition("No background color given"))
                .and_then(parse_hex_color)
                .map(|rgb| RgbImage::from_pixel(cutout.width(), cutout.height(), image::Rgb(rgb))),
            BackgroundMode::Image => settings
                .background_image
                .as_deref()
                .ok_or_else(|| CutoutError::composition("No background image given"))
                .and_then(|path| self.source.load(path))
                .and_then(|bg| fit_background(&bg.to_rgb8(), cutout.width(), cutout.height())),
        };

        match background {
            Ok(bg) => Composition {
                image: blend(cutout, &bg),
                degraded: false,
            },
            Err(e) => {
                log::warn!("Compositing failed, using white background: {}", e);
                let white = RgbImage::from_pixel(cutout.width(), cutout.height(), image::Rgb(WHITE));
                Composition {
                    image: blend(cutout, &white),
                    degraded: true,
                }
            },
        }
    }
}

/// Center-crop to the target aspect when it differs noticeably, then resize
fn fit_background(background: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    let (bw, bh) = background.dimensions();
    if bw == 0 || bh == 0 || width == 0 || height == 0 {
        return Err(CutoutError::composition("Background image is empty"));
    }
    let source_aspect = bw as f32 / bh as f32;
    let target_aspect = width as f32 / height as f32;

    let cropped = if (source_aspect - target_aspect).abs() >= CROP_ASPECT_TOLERANCE {
        let (cw, ch) = if source_aspect > target_aspect {
            (((bh as f32 * target_aspect).round() as u32).clamp(1, bw), bh)
        } else {
            (bw, ((bw as f32 / target_aspect).round() as u32).clamp(1, bh))
        };
        image::imageops::crop_imm(background, (bw - cw) / 2, (bh - ch) / 2, cw, ch).to_image()
    } else {
        background.clone()
    };

    Ok(image::imageops::resize(&cropped, width, height, FilterType::Lanczos3))
}

/// Alpha-composite the cutout over an opaque background
fn blend(foreground: &RgbaImage, background: &RgbImage) -> RgbaImage {
    let mut out = RgbaImage::new(foreground.width(), foreground.height());
    for ((dst, fg), bg) in out
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(background.pixels())
    {
        let alpha = u16::from(fg[3]);
        let mix = |f: u8, b: u8| -> u8 {
            ((u16::from(f) * alpha + u16::from(b) * (255 - alpha) + 127) / 255) as u8
        };
        *dst = Rgba([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2]), 255]);
    }
    out
}
