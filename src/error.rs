//! Error types for cutout pipeline operations

use crate::backends::BackendId;
use thiserror::Error;

/// Result type alias for cutout pipeline operations
pub type Result<T> = std::result::Result<T, CutoutError>;

/// Error types for cutout pipeline operations
///
/// Only `InvalidInput` and `InvalidConfig` ever escape
/// [`CutoutProcessor::process`](crate::processor::CutoutProcessor::process);
/// every other variant is produced inside a stage and absorbed by the
/// orchestrator into a degraded result.
#[derive(Error, Debug)]
pub enum CutoutError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input that cannot be processed at all (empty or undecodable image)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A segmentation backend is not loaded
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(BackendId),

    /// A loaded backend failed during a call
    #[error("Inference error: {0}")]
    Inference(String),

    /// A backend call exceeded its time budget
    #[error("Backend {backend} timed out after {elapsed_ms}ms")]
    Timeout { backend: BackendId, elapsed_ms: u64 },

    /// A candidate mask was rejected by the quality gate
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Background color or image could not be applied
    #[error("Composition error: {0}")]
    Composition(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Errors inside an image processing stage
    #[error("Processing error: {0}")]
    Processing(String),
}

impl CutoutError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new composition error
    pub fn composition<S: Into<String>>(msg: S) -> Self {
        Self::Composition(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Whether this error means "the backend produced no result" rather than a caller mistake
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Inference(_) | Self::Timeout { .. } | Self::Model(_)
        )
    }
}
