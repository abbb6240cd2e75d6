//! Pipeline orchestration
//!
//! [`CutoutProcessor`] runs every stage for one image: analysis, backend
//! segmentation with gate-driven retries, post-processing, refinement, the
//! fallback chain and compositing. Apart from invalid input it always
//! returns a result; degraded paths are recorded in the metadata.

use crate::{
    analysis::{ConfigSelector, ProductClassifier, QualityAnalyzer, SelectedConfig},
    backends::{BackendId, BackendRegistry, SegmentationBackend},
    compositor::{BackgroundSource, Compositor},
    config::{ProcessingSettings, ProcessorConfig, QualityPreset},
    error::{CutoutError, Result},
    fallback::FallbackChain,
    fusion::EnsembleFusion,
    gate::{GateVerdict, QualityGate},
    postprocess::{MaskPostProcessor, PostProcessOptions},
    refine::{EdgeRefiner, RefineOptions},
    services::progress::{ProcessingStage, ProgressReporter, ProgressTracker},
    types::{
        AcceptedStrategy, BackendResult, DiagnosticMasks, Mask, ProcessingMetadata,
        ProcessingResult, QualityMetrics,
    },
    utils::imaging,
};
use image::{DynamicImage, RgbImage, RgbaImage};
use instant::Instant;
use log::{debug, warn};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use tracing::{info as trace_info, instrument, span, Level};

/// Most backends fused in one ensemble
const MAX_ENSEMBLE: usize = 3;

/// Everything one image carries through the pipeline
struct ImageContext<'a> {
    settings: &'a ProcessingSettings,
    /// Image used for analysis and segmentation, alpha flattened on white
    analysis: RgbImage,
    quality: QualityMetrics,
    selected: SelectedConfig,
    diagnostics: Option<DiagnosticMasks>,
    /// IsNet mask for hole transfer, fetched at most once
    reference: Option<Option<Mask>>,
}

impl ImageContext<'_> {
    fn record(&mut self, name: impl Into<String>, mask: &Mask) {
        if let Some(diagnostics) = self.diagnostics.as_mut() {
            diagnostics.push(name, mask.clone());
        }
    }
}

/// Mask accepted by the gate, or a fallback outcome
struct Accepted {
    mask: Mask,
    strategy: AcceptedStrategy,
    verdict: Option<GateVerdict>,
}

/// Background removal pipeline sharing a read-only backend registry
pub struct CutoutProcessor {
    registry: Arc<BackendRegistry>,
    config: ProcessorConfig,
    analyzer: QualityAnalyzer,
    classifier: ProductClassifier,
    postprocessor: MaskPostProcessor,
    refiner: EdgeRefiner,
    gate: QualityGate,
    fallback: FallbackChain,
    compositor: Compositor,
}

impl std::fmt::Debug for CutoutProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CutoutProcessor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CutoutProcessor {
    /// Create a processor; an empty registry runs on classical fallbacks only
    #[must_use]
    pub fn new(registry: Arc<BackendRegistry>, config: ProcessorConfig) -> Self {
        let tuning = &config.tuning;
        let gate = QualityGate::new(tuning.gate.clone());
        if registry.is_empty() {
            warn!("No segmentation backends registered, only fallback segmentation is available");
        }
        Self {
            analyzer: QualityAnalyzer::new(tuning.quality.clone()),
            classifier: ProductClassifier::new(tuning.classifier.clone()),
            postprocessor: MaskPostProcessor::new(tuning.postprocess.clone()),
            refiner: EdgeRefiner::new(tuning.refinement.clone()),
            fallback: FallbackChain::new(tuning.fallback.clone(), gate.clone()),
            gate,
            compositor: Compositor::default(),
            registry,
            config,
        }
    }

    /// Replace the loader used for background pictures
    #[must_use]
    pub fn with_background_source(mut self, source: Box<dyn BackgroundSource>) -> Self {
        self.compositor = Compositor::new(source);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Decode and process encoded image bytes
    ///
    /// # Errors
    /// - Bytes that do not decode to an image
    /// - Everything [`CutoutProcessor::process`] rejects
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        settings: &ProcessingSettings,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<ProcessingResult> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| CutoutError::invalid_input(format!("Failed to decode image: {}", e)))?;
        self.process(&image, settings, progress)
    }

    /// Open and process an image file
    pub fn process_file<P: AsRef<Path>>(
        &self,
        path: P,
        settings: &ProcessingSettings,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<ProcessingResult> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CutoutError::invalid_input(format!(
                "Input file does not exist: {}",
                path.display()
            )));
        }
        let image = image::open(path).map_err(|e| {
            CutoutError::invalid_input(format!("Failed to decode '{}': {}", path.display(), e))
        })?;
        self.process(&image, settings, progress)
    }

    /// Run the full pipeline on one image
    ///
    /// # Errors
    /// - Zero-sized images
    /// - Settings that fail validation
    ///
    /// Backend failures, gate rejections and compositing problems are
    /// absorbed and reported through the result metadata.
    #[instrument(
        skip(self, image, settings, progress),
        fields(
            dimensions = %format!("{}x{}", image.width(), image.height()),
            mode = %settings.background_mode,
            quality = %settings.quality
        )
    )]
    pub fn process(
        &self,
        image: &DynamicImage,
        settings: &ProcessingSettings,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<ProcessingResult> {
        let total_start = Instant::now();
        settings.validate()?;
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(CutoutError::invalid_input(format!(
                "Image has zero size ({}x{})",
                width, height
            )));
        }

        let mut tracker = ProgressTracker::new(progress);
        tracker.report_stage(ProcessingStage::ImageLoading);
        let colors = image.to_rgb8();
        let (analysis, input_alpha) = if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            let alpha = Mask::from_fn(width, height, |x, y| rgba.get_pixel(x, y)[3]);
            (imaging::flatten_on_white(&rgba), Some(alpha))
        } else {
            (colors.clone(), None)
        };

        // Analysis
        let analysis_start = Instant::now();
        tracker.report_stage(ProcessingStage::QualityAnalysis);
        let quality = self.analyzer.analyze(&analysis);
        tracker.report_stage(ProcessingStage::Classification);
        let category = self.classifier.classify(&analysis);
        let selected = ConfigSelector::select(category, settings);
        let mut metadata = ProcessingMetadata::new(category, quality);
        metadata.timings.analysis_ms = analysis_start.elapsed().as_millis() as u64;

        trace_info!(
            category = %category,
            backend = %selected.backend,
            quality_score = quality.composite_quality_score,
            "🎯 Starting cutout"
        );

        let mut ctx = ImageContext {
            settings,
            analysis,
            quality,
            selected,
            diagnostics: settings.debug_masks.then(DiagnosticMasks::new),
            reference: None,
        };

        let accepted = self.segment_with_retries(&mut ctx, &mut metadata, &mut tracker);
        let accepted = match accepted {
            Some(accepted) => accepted,
            None => {
                let _span = span!(Level::INFO, "fallback").entered();
                tracker.report_stage(ProcessingStage::Fallback);
                let fallback_start = Instant::now();
                let outcome = self.fallback.run(&ctx.analysis, ctx.diagnostics.as_mut());
                metadata.timings.fallback_ms = fallback_start.elapsed().as_millis() as u64;
                match outcome {
                    Ok(outcome) => Accepted {
                        mask: outcome.mask,
                        strategy: outcome.strategy,
                        verdict: outcome.verdict,
                    },
                    Err(e) => {
                        warn!("Every segmentation strategy failed: {}", e);
                        tracker.report_error(&e.to_string());
                        return Ok(Self::unprocessed(&colors, ctx, metadata, total_start));
                    },
                }
            },
        };

        // Input alpha first so binarization also covers soft input edges; feathering last
        let mut mask = accepted.mask;
        if let Some(alpha) = &input_alpha {
            match mask.intersect(alpha) {
                Ok(intersected) => mask = intersected,
                Err(e) => warn!("Could not apply input alpha: {}", e),
            }
        }
        if ctx.selected.force_binary_alpha {
            mask = self.postprocessor.binarize(&mask);
        }
        if settings.feather_radius > 0 {
            mask = MaskPostProcessor::feather(&mask, settings.feather_radius);
            // Feathering must not bleed into pixels the input already made transparent
            if let Some(alpha) = &input_alpha {
                if let Ok(intersected) = mask.intersect(alpha) {
                    mask = intersected;
                }
            }
        }
        ctx.record("final", &mask);

        tracker.report_stage(ProcessingStage::Composition);
        let composition_start = Instant::now();
        let cutout = match mask.apply_to(&colors) {
            Ok(cutout) => cutout,
            Err(e) => {
                warn!("Failed to apply mask: {}", e);
                tracker.report_error(&e.to_string());
                return Ok(Self::unprocessed(&colors, ctx, metadata, total_start));
            },
        };
        let composition = self.compositor.compose(&cutout, settings);
        if composition.degraded {
            tracker.report_error("background could not be applied, used white");
        }
        metadata.timings.composition_ms = composition_start.elapsed().as_millis() as u64;

        metadata.strategy = accepted.strategy;
        metadata.gate_verdict = accepted.verdict;
        metadata.composition_degraded = composition.degraded;
        metadata.timings.total_ms = total_start.elapsed().as_millis() as u64;
        tracker.report_stage(ProcessingStage::Completed);
        tracker.report_completion(&metadata.timings);
        trace_info!(
            strategy = %metadata.strategy,
            elapsed_ms = tracker.elapsed_ms(),
            "✅ Cutout finished"
        );

        let result = ProcessingResult {
            image: composition.image,
            mask,
            diagnostics: ctx.diagnostics,
            metadata,
        };
        debug!("{}", result.summary());
        Ok(result)
    }

    /// Try backends until one passes the gate, within the retry budget
    fn segment_with_retries(
        &self,
        ctx: &mut ImageContext<'_>,
        metadata: &mut ProcessingMetadata,
        tracker: &mut ProgressTracker<'_>,
    ) -> Option<Accepted> {
        let mut remaining = self.candidate_order(ctx.selected.backend);
        if remaining.is_empty() {
            return None;
        }
        let max_attempts = 1 + self.config.max_retries as usize;

        for attempt in 0..max_attempts {
            if remaining.is_empty() {
                break;
            }
            if attempt > 0 {
                metadata.retries += 1;
            }

            let use_ensemble = attempt == 0
                && ctx.settings.quality == QualityPreset::Ultra
                && remaining.len() >= 2;
            let take = if use_ensemble {
                remaining.len().min(MAX_ENSEMBLE)
            } else {
                1
            };
            let members: Vec<BackendId> = remaining.drain(..take).collect();

            tracker.report_stage_with_description(
                ProcessingStage::Segmentation,
                format!(
                    "Segmenting with {}",
                    members.iter().map(BackendId::as_str).collect::<Vec<_>>().join("+")
                ),
            );
            let segmentation_start = Instant::now();
            let mut results = Vec::with_capacity(members.len());
            for id in &members {
                metadata.attempted_backends.push(*id);
                match self.run_backend(*id, &ctx.analysis) {
                    Ok(result) => {
                        ctx.record(format!("backend:{}", id), &result.mask);
                        results.push(result);
                    },
                    Err(e) => {
                        warn!("Backend {} produced no result: {}", id, e);
                        tracker.report_error(&e.to_string());
                    },
                }
            }
            metadata.timings.segmentation_ms += segmentation_start.elapsed().as_millis() as u64;
            if results.is_empty() {
                continue;
            }

            let fusion_start = Instant::now();
            let strategy = if results.len() > 1 {
                AcceptedStrategy::Ensemble(results.iter().map(|r| r.backend_id).collect())
            } else {
                AcceptedStrategy::Backend(results.first().map_or(ctx.selected.backend, |r| r.backend_id))
            };
            let raw = match EnsembleFusion::fuse(&results) {
                Ok(mask) => mask,
                Err(e) => {
                    warn!("Fusion failed: {}", e);
                    continue;
                },
            };
            if results.len() > 1 {
                tracker.report_stage(ProcessingStage::EnsembleFusion);
                ctx.record("fused", &raw);
            }
            metadata.timings.fusion_ms += fusion_start.elapsed().as_millis() as u64;

            let primary = results.first().map(|r| r.backend_id);
            let candidate = match self.refine_candidate(ctx, &raw, primary, metadata, tracker) {
                Ok(mask) => mask,
                Err(e) => {
                    warn!("Post-processing failed for {}: {}", strategy, e);
                    tracker.report_error(&e.to_string());
                    continue;
                },
            };

            tracker.report_stage(ProcessingStage::QualityCheck);
            let verdict = self.gate.evaluate(&candidate);
            if verdict.passed() {
                trace_info!(strategy = %strategy, coverage = verdict.coverage, "✅ Mask accepted");
                return Some(Accepted {
                    mask: candidate,
                    strategy,
                    verdict: Some(verdict),
                });
            }
            warn!("{} rejected by quality gate: {}", strategy, verdict.reasons());
        }
        None
    }

    /// Post-process and refine one raw mask
    fn refine_candidate(
        &self,
        ctx: &mut ImageContext<'_>,
        raw: &Mask,
        primary: Option<BackendId>,
        metadata: &mut ProcessingMetadata,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<Mask> {
        let reference = if ctx.selected.preserve_holes && primary != Some(BackendId::IsNet) {
            self.reference_mask(ctx)
        } else {
            None
        };

        tracker.report_stage(ProcessingStage::PostProcessing);
        let post_start = Instant::now();
        let options = PostProcessOptions {
            category: metadata.category,
            preserve_holes: ctx.selected.preserve_holes,
            force_binary_alpha: ctx.selected.force_binary_alpha,
        };
        let processed = {
            let _span = span!(Level::DEBUG, "postprocessing", category = %metadata.category).entered();
            self.postprocessor.process(raw, &options, reference.as_ref())?
        };
        ctx.record("post_processed", &processed);
        metadata.timings.postprocessing_ms += post_start.elapsed().as_millis() as u64;

        if !ctx.selected.edge_refinement {
            return Ok(processed);
        }
        tracker.report_stage(ProcessingStage::EdgeRefinement);
        let refine_start = Instant::now();
        let refined = {
            let _span = span!(Level::DEBUG, "refinement").entered();
            self.refiner.refine(
                &processed,
                &ctx.analysis,
                RefineOptions {
                    low_quality: ctx.quality.is_low_quality(),
                    force_binary_alpha: ctx.selected.force_binary_alpha,
                },
            )
        };
        ctx.record("refined", &refined);
        metadata.timings.refinement_ms += refine_start.elapsed().as_millis() as u64;
        Ok(refined)
    }

    /// IsNet mask used to transfer holes, computed once per image
    fn reference_mask(&self, ctx: &mut ImageContext<'_>) -> Option<Mask> {
        if let Some(cached) = &ctx.reference {
            return cached.clone();
        }
        let reference = if self.registry.contains(BackendId::IsNet) {
            match self.run_backend(BackendId::IsNet, &ctx.analysis) {
                Ok(result) => Some(result.mask),
                Err(e) => {
                    debug!("Reference mask unavailable: {}", e);
                    None
                },
            }
        } else {
            None
        };
        if let Some(mask) = &reference {
            ctx.record(format!("reference:{}", BackendId::IsNet), mask);
        }
        ctx.reference = Some(reference.clone());
        reference
    }

    /// Registered backends, preferred one first, then retry priority order
    fn candidate_order(&self, preferred: BackendId) -> Vec<BackendId> {
        let mut order = self.registry.ids_by_priority();
        if let Some(pos) = order.iter().position(|&id| id == preferred) {
            let id = order.remove(pos);
            order.insert(0, id);
        } else if !order.is_empty() {
            debug!(
                "Preferred backend {} not registered, starting with {:?}",
                preferred,
                order.first()
            );
        }
        order
    }

    /// Call one backend, with the configured timeout, and fit its mask to the image
    fn run_backend(&self, id: BackendId, image: &RgbImage) -> Result<BackendResult> {
        let backend = self.registry.get(id)?;
        let _span = span!(Level::INFO, "segmentation", backend = %id).entered();
        let start = Instant::now();
        let mut result = match self.config.backend_timeout {
            None => backend.segment(image)?,
            Some(timeout) => call_with_timeout(backend, image, timeout)?,
        };
        if result.mask.dimensions() != image.dimensions() {
            debug!(
                "Resizing {} mask from {:?} to {:?}",
                id,
                result.mask.dimensions(),
                image.dimensions()
            );
            result.mask = result.mask.resized(image.width(), image.height());
        }
        debug!("Backend {} finished in {}ms", id, start.elapsed().as_millis());
        Ok(result)
    }

    /// Catastrophic path: the input, fully opaque
    fn unprocessed(
        colors: &RgbImage,
        ctx: ImageContext<'_>,
        mut metadata: ProcessingMetadata,
        total_start: Instant,
    ) -> ProcessingResult {
        let (w, h) = colors.dimensions();
        let image = RgbaImage::from_fn(w, h, |x, y| {
            let p = colors.get_pixel(x, y);
            image::Rgba([p[0], p[1], p[2], 255])
        });
        metadata.strategy = AcceptedStrategy::Unprocessed;
        metadata.timings.total_ms = total_start.elapsed().as_millis() as u64;
        ProcessingResult {
            image,
            mask: Mask::filled(w, h, 255),
            diagnostics: ctx.diagnostics,
            metadata,
        }
    }
}

/// Run `segment` on a helper thread and stop waiting after `timeout`
///
/// The helper thread is detached on timeout; its result is dropped.
fn call_with_timeout(
    backend: Arc<dyn SegmentationBackend>,
    image: &RgbImage,
    timeout: std::time::Duration,
) -> Result<BackendResult> {
    let id = backend.id();
    let image = image.clone();
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    std::thread::Builder::new()
        .name(format!("segment-{}", id))
        .spawn(move || {
            // The receiver may have given up already
            let _ = tx.send(backend.segment(&image));
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(CutoutError::Timeout {
            backend: id,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(CutoutError::inference(format!(
            "{} worker exited without a result",
            id
        ))),
    }
}
