//! Mock segmentation backends for testing the pipeline
//!
//! These backends need no model files. They are public so integration
//! tests, benchmarks and host applications can exercise retry, timeout and
//! fallback behavior deterministically.

use crate::{
    backends::{BackendId, SegmentationBackend},
    error::{CutoutError, Result},
    types::{BackendResult, Mask},
};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Segments by color distance to the mean border color
///
/// Works well on synthetic product shots with a flat background, which is
/// what the pipeline tests use.
#[derive(Debug, Clone)]
pub struct MockBackend {
    id: BackendId,
    confidence: f32,
    tolerance: f32,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    #[must_use]
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            confidence: 0.9,
            tolerance: 40.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Euclidean RGB distance beyond which a pixel counts as foreground
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Shared counter of `segment` calls, usable after the backend is moved into a registry
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Border-color segmentation shared by the mock family
    #[must_use]
    pub fn border_distance_mask(image: &RgbImage, tolerance: f32) -> Mask {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Mask::new(w, h);
        }
        let mut sum = [0.0f64; 3];
        let mut count = 0.0f64;
        for (x, y, p) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                for (acc, &c) in sum.iter_mut().zip(p.0.iter()) {
                    *acc += f64::from(c);
                }
                count += 1.0;
            }
        }
        let border = sum.map(|s| (s / count) as f32);
        Mask::from_fn(w, h, |x, y| {
            let p = image.get_pixel(x, y);
            let dist = p
                .0
                .iter()
                .zip(border.iter())
                .map(|(&c, &b)| (f32::from(c) - b).powi(2))
                .sum::<f32>()
                .sqrt();
            if dist > tolerance {
                255
            } else {
                0
            }
        })
    }
}

impl SegmentationBackend for MockBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn segment(&self, image: &RgbImage) -> Result<BackendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mask = Self::border_distance_mask(image, self.tolerance);
        Ok(BackendResult::new(mask, self.confidence, self.id))
    }
}

/// Backend whose every call fails with an inference error
#[derive(Debug, Clone)]
pub struct FailingBackend {
    id: BackendId,
    calls: Arc<AtomicUsize>,
}

impl FailingBackend {
    #[must_use]
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl SegmentationBackend for FailingBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn segment(&self, _image: &RgbImage) -> Result<BackendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CutoutError::inference(format!(
            "{} simulated inference failure",
            self.id
        )))
    }
}

/// Backend that always returns the same mask, resized to the input
#[derive(Debug, Clone)]
pub struct FixedMaskBackend {
    id: BackendId,
    mask: Mask,
    confidence: f32,
    calls: Arc<AtomicUsize>,
}

impl FixedMaskBackend {
    #[must_use]
    pub fn new(id: BackendId, mask: Mask) -> Self {
        Self {
            id,
            mask,
            confidence: 0.8,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Backend returning a uniform mask, useful for degenerate all-foreground or all-background cases
    #[must_use]
    pub fn uniform(id: BackendId, value: u8) -> Self {
        Self::new(id, Mask::filled(1, 1, value))
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl SegmentationBackend for FixedMaskBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn segment(&self, image: &RgbImage) -> Result<BackendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = image.dimensions();
        let mask = if self.mask.dimensions() == (1, 1) {
            Mask::filled(w, h, self.mask.get(0, 0))
        } else {
            self.mask.resized(w, h)
        };
        Ok(BackendResult::new(mask, self.confidence, self.id))
    }
}

/// Backend that sleeps before segmenting like [`MockBackend`]
#[derive(Debug, Clone)]
pub struct SlowBackend {
    inner: MockBackend,
    delay: Duration,
}

impl SlowBackend {
    #[must_use]
    pub fn new(id: BackendId, delay: Duration) -> Self {
        Self {
            inner: MockBackend::new(id),
            delay,
        }
    }
}

impl SegmentationBackend for SlowBackend {
    fn id(&self) -> BackendId {
        self.inner.id()
    }

    fn segment(&self, image: &RgbImage) -> Result<BackendResult> {
        std::thread::sleep(self.delay);
        self.inner.segment(image)
    }
}

/// Backend that reports itself unavailable, as a model with missing weights would
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    id: BackendId,
}

impl UnavailableBackend {
    #[must_use]
    pub fn new(id: BackendId) -> Self {
        Self { id }
    }
}

impl SegmentationBackend for UnavailableBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn is_available(&self) -> bool {
        false
    }

    fn segment(&self, _image: &RgbImage) -> Result<BackendResult> {
        Err(CutoutError::BackendUnavailable(self.id))
    }
}
