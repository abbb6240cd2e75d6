//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline,
//! allowing host applications to route updates to their own UI.

use crate::types::ProcessingTimings;
use instant::Instant;

/// Pipeline stages reported while a single image is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Decoding the input image
    ImageLoading,
    /// Blur, noise and resolution analysis
    QualityAnalysis,
    /// Product categorization and backend selection
    Classification,
    /// Running segmentation backends
    Segmentation,
    /// Fusing several backend masks
    EnsembleFusion,
    /// Hole cutting and mask cleanup
    PostProcessing,
    /// Guided and bilateral edge refinement
    EdgeRefinement,
    /// Coverage and edge density check
    QualityCheck,
    /// Classical segmentation after backend rejection
    Fallback,
    /// Applying the requested background
    Composition,
    /// Processing completed
    Completed,
    /// One item of a batch finished
    BatchItemProcessing,
}

impl ProcessingStage {
    /// Short label shown to users
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ImageLoading => "Loading input image",
            ProcessingStage::QualityAnalysis => "Analyzing image quality",
            ProcessingStage::Classification => "Classifying product",
            ProcessingStage::Segmentation => "Segmenting foreground",
            ProcessingStage::EnsembleFusion => "Fusing backend masks",
            ProcessingStage::PostProcessing => "Cleaning up mask",
            ProcessingStage::EdgeRefinement => "Refining edges",
            ProcessingStage::QualityCheck => "Checking mask quality",
            ProcessingStage::Fallback => "Running fallback segmentation",
            ProcessingStage::Composition => "Compositing background",
            ProcessingStage::Completed => "Processing completed",
            ProcessingStage::BatchItemProcessing => "Processing batch item",
        }
    }

    /// Fixed completion percentage reached when the stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ImageLoading => 5,
            ProcessingStage::QualityAnalysis => 10,
            ProcessingStage::Classification => 15,
            ProcessingStage::Segmentation => 30,
            ProcessingStage::EnsembleFusion => 50,
            ProcessingStage::PostProcessing => 60,
            ProcessingStage::EdgeRefinement => 70,
            ProcessingStage::QualityCheck => 80,
            ProcessingStage::Fallback => 85,
            ProcessingStage::Composition => 95,
            ProcessingStage::Completed => 100,
            ProcessingStage::BatchItemProcessing => 50,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(
        stage: ProcessingStage,
        description: String,
        start_time: Instant,
    ) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Counts reported after each batch item finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl BatchProgress {
    /// Share of finished items, as a percentage
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.completed + self.failed + self.cancelled;
        ((done * 100) / self.total).min(100) as u8
    }
}

/// Trait for reporting progress during cutout processing
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report a degraded stage; processing continues
    fn report_error(&self, stage: ProcessingStage, error: &str);

    /// Report batch progress after each item
    fn report_batch_progress(&self, progress: BatchProgress) {
        drop(progress);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Adapts a `Fn(progress, description)` closure, as host UIs typically provide
pub struct CallbackProgressReporter<F>
where
    F: Fn(u8, &str) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgressReporter<F>
where
    F: Fn(u8, &str) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for CallbackProgressReporter<F>
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn report_progress(&self, update: ProgressUpdate) {
        (self.callback)(update.progress, &update.description);
    }

    fn report_completion(&self, _timings: &ProcessingTimings) {
        (self.callback)(100, ProcessingStage::Completed.description());
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        (self.callback)(
            stage.progress_percentage(),
            &format!("{} failed: {}", stage.description(), error),
        );
    }

    fn report_batch_progress(&self, progress: BatchProgress) {
        (self.callback)(
            progress.percentage(),
            &format!(
                "Processed {}/{} images",
                progress.completed + progress.failed + progress.cancelled,
                progress.total
            ),
        );
    }
}

/// Console progress reporter that logs progress through `log`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show detailed progress information
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("✅ Cutout completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Analysis: {}ms", timings.analysis_ms);
            log::info!("    • Segmentation: {}ms", timings.segmentation_ms);
            log::info!("    • Fusion: {}ms", timings.fusion_ms);
            log::info!("    • Postprocessing: {}ms", timings.postprocessing_ms);
            log::info!("    • Refinement: {}ms", timings.refinement_ms);
            log::info!("    • Fallback: {}ms", timings.fallback_ms);
            log::info!("    • Composition: {}ms", timings.composition_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::warn!("⚠️ Degraded during {}: {}", stage.description(), error);
    }

    fn report_batch_progress(&self, progress: BatchProgress) {
        log::info!(
            "[{}%] Batch: {} completed, {} failed, {} cancelled of {}",
            progress.percentage(),
            progress.completed,
            progress.failed,
            progress.cancelled,
            progress.total
        );
    }
}

/// Progress tracker that manages timing and an optional borrowed reporter
pub struct ProgressTracker<'a> {
    reporter: Option<&'a dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: Option<&'a dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Report progress for a specific stage
    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        if let Some(reporter) = self.reporter {
            reporter.report_progress(ProgressUpdate::new(stage, self.start_time));
        }
    }

    /// Report progress with custom description
    pub fn report_stage_with_description(&mut self, stage: ProcessingStage, description: String) {
        self.current_stage = Some(stage);
        if let Some(reporter) = self.reporter {
            reporter.report_progress(ProgressUpdate::with_description(
                stage,
                description,
                self.start_time,
            ));
        }
    }

    /// Report completion with final timings
    pub fn report_completion(&self, timings: &ProcessingTimings) {
        if let Some(reporter) = self.reporter {
            reporter.report_completion(timings);
        }
    }

    /// Report a degraded step at the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::ImageLoading);
        if let Some(reporter) = self.reporter {
            reporter.report_error(stage, error);
        }
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the current processing stage
    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures every report for assertions
    #[derive(Default)]
    struct TestProgressReporter {
        progress_updates: Arc<Mutex<Vec<ProgressUpdate>>>,
        completions: Arc<Mutex<Vec<u64>>>,
        errors: Arc<Mutex<Vec<(ProcessingStage, String)>>>,
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.progress_updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, timings: &ProcessingTimings) {
            self.completions.lock().unwrap().push(timings.total_ms);
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_processing_stage_descriptions() {
        assert_eq!(
            ProcessingStage::Segmentation.description(),
            "Segmenting foreground"
        );
        assert_eq!(
            ProcessingStage::Completed.description(),
            "Processing completed"
        );
    }

    #[test]
    fn test_single_image_stages_are_monotonic() {
        let stages = [
            ProcessingStage::ImageLoading,
            ProcessingStage::QualityAnalysis,
            ProcessingStage::Classification,
            ProcessingStage::Segmentation,
            ProcessingStage::EnsembleFusion,
            ProcessingStage::PostProcessing,
            ProcessingStage::EdgeRefinement,
            ProcessingStage::QualityCheck,
            ProcessingStage::Fallback,
            ProcessingStage::Composition,
            ProcessingStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
    }

    #[test]
    fn test_progress_update_creation() {
        let update = ProgressUpdate::new(ProcessingStage::Segmentation, Instant::now());
        assert_eq!(update.stage, ProcessingStage::Segmentation);
        assert_eq!(update.progress, 30);
        assert!(update.elapsed_ms < 100);
    }

    #[test]
    fn test_callback_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = CallbackProgressReporter::new(move |progress, description: &str| {
            sink.lock().unwrap().push((progress, description.to_string()));
        });
        reporter.report_progress(ProgressUpdate::new(
            ProcessingStage::EdgeRefinement,
            Instant::now(),
        ));
        reporter.report_completion(&ProcessingTimings::default());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (70, "Refining edges".to_string()));
        assert_eq!(seen[1].0, 100);
    }

    #[test]
    fn test_progress_tracker() {
        let reporter = TestProgressReporter::default();
        let updates = Arc::clone(&reporter.progress_updates);
        let errors = Arc::clone(&reporter.errors);
        let completions = Arc::clone(&reporter.completions);

        let mut tracker = ProgressTracker::new(Some(&reporter));
        tracker.report_stage(ProcessingStage::QualityAnalysis);
        tracker.report_stage_with_description(
            ProcessingStage::Segmentation,
            "Running isnet".to_string(),
        );
        tracker.report_error("isnet timed out");
        tracker.report_completion(&ProcessingTimings::default());

        assert_eq!(tracker.current_stage(), Some(ProcessingStage::Segmentation));
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].description, "Running isnet");
        assert_eq!(
            errors.lock().unwrap().first().map(|(s, _)| *s),
            Some(ProcessingStage::Segmentation)
        );
        assert_eq!(completions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tracker_without_reporter() {
        let mut tracker = ProgressTracker::new(None);
        tracker.report_stage(ProcessingStage::Composition);
        tracker.report_error("ignored");
        assert_eq!(tracker.current_stage(), Some(ProcessingStage::Composition));
        assert!(tracker.elapsed_ms() < 1_000);
    }

    #[test]
    fn test_batch_progress_percentage() {
        let progress = BatchProgress {
            completed: 2,
            failed: 1,
            cancelled: 0,
            total: 4,
        };
        assert_eq!(progress.percentage(), 75);
        let empty = BatchProgress {
            completed: 0,
            failed: 0,
            cancelled: 0,
            total: 0,
        };
        assert_eq!(empty.percentage(), 100);
    }
}
