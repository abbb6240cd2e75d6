//! Parallel processing of many images
//!
//! Each image runs the synchronous pipeline on tokio's blocking pool. At
//! most `workers` images are in flight; results come back in input order.

use crate::{
    config::ProcessingSettings,
    error::CutoutError,
    processor::CutoutProcessor,
    services::progress::{BatchProgress, ProcessingStage, ProgressReporter, ProgressUpdate},
    types::ProcessingResult,
};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use instant::Instant;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info as trace_info, instrument};

pub const DEFAULT_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 4;

/// What happened to one batch item
#[derive(Debug)]
pub enum BatchItemOutcome {
    Completed(Box<ProcessingResult>),
    Failed(CutoutError),
    /// Cancellation was requested before the item started
    Cancelled,
}

impl BatchItemOutcome {
    #[must_use]
    pub fn result(&self) -> Option<&ProcessingResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Per-item outcomes, in input order
#[derive(Debug)]
pub struct BatchReport {
    pub items: Vec<BatchItemOutcome>,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed_ms: u64,
}

impl BatchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.completed == self.items.len()
    }
}

/// Bounded worker pool over a shared [`CutoutProcessor`]
pub struct BatchProcessor {
    processor: Arc<CutoutProcessor>,
    workers: usize,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    /// `workers` is clamped to `1..=4`
    #[must_use]
    pub fn new(processor: Arc<CutoutProcessor>, workers: usize) -> Self {
        let clamped = workers.clamp(1, MAX_WORKERS);
        if clamped != workers {
            log::debug!("Clamped batch workers from {} to {}", workers, clamped);
        }
        Self {
            processor,
            workers: clamped,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_default_workers(processor: Arc<CutoutProcessor>) -> Self {
        Self::new(processor, DEFAULT_WORKERS)
    }

    /// Receive [`BatchProgress`] after every finished item
    #[must_use]
    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every image, checking `cancel` before each one starts
    ///
    /// Images already running when cancellation is requested finish
    /// normally; the rest are reported as [`BatchItemOutcome::Cancelled`].
    #[instrument(skip(self, items, settings, cancel), fields(workers = self.workers))]
    pub async fn process_all(
        &self,
        items: Vec<DynamicImage>,
        settings: &ProcessingSettings,
        cancel: CancellationToken,
    ) -> BatchReport {
        let start = Instant::now();
        let total = items.len();
        trace_info!(total, "📦 Starting batch");

        let settings = Arc::new(settings.clone());
        let mut outcomes = stream::iter(items.into_iter().enumerate())
            .map(|(index, image)| {
                let processor = Arc::clone(&self.processor);
                let settings = Arc::clone(&settings);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        log::debug!("Batch item {} cancelled before start", index);
                        return BatchItemOutcome::Cancelled;
                    }
                    let joined = tokio::task::spawn_blocking(move || {
                        processor.process(&image, &settings, None)
                    })
                    .await;
                    match joined {
                        Ok(Ok(result)) => BatchItemOutcome::Completed(Box::new(result)),
                        Ok(Err(e)) => {
                            log::warn!("Batch item {} failed: {}", index, e);
                            BatchItemOutcome::Failed(e)
                        },
                        Err(e) => {
                            log::error!("Batch item {} worker panicked: {}", index, e);
                            BatchItemOutcome::Failed(CutoutError::processing(format!(
                                "Worker for item {} did not finish: {}",
                                index, e
                            )))
                        },
                    }
                }
            })
            .buffered(self.workers);

        let mut report = BatchReport {
            items: Vec::with_capacity(total),
            completed: 0,
            failed: 0,
            cancelled: 0,
            elapsed_ms: 0,
        };
        while let Some(outcome) = outcomes.next().await {
            let label = match &outcome {
                BatchItemOutcome::Completed(_) => {
                    report.completed += 1;
                    "completed"
                },
                BatchItemOutcome::Failed(_) => {
                    report.failed += 1;
                    "failed"
                },
                BatchItemOutcome::Cancelled => {
                    report.cancelled += 1;
                    "cancelled"
                },
            };
            report.items.push(outcome);
            if let Some(progress) = &self.progress {
                progress.report_progress(ProgressUpdate::with_description(
                    ProcessingStage::BatchItemProcessing,
                    format!("Item {}/{} {}", report.items.len(), total, label),
                    start,
                ));
                progress.report_batch_progress(BatchProgress {
                    completed: report.completed,
                    failed: report.failed,
                    cancelled: report.cancelled,
                    total,
                });
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        trace_info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "✅ Batch finished"
        );
        report
    }
}
