//! Configuration types for cutout processing
//!
//! [`ProcessingSettings`] is the per-request contract with the host
//! application. [`ProcessorConfig`] is fixed when a
//! [`CutoutProcessor`](crate::processor::CutoutProcessor) is built and holds
//! the empirically chosen thresholds of every stage.

use crate::{
    analysis::{ClassifierThresholds, QualityThresholds},
    backends::BackendId,
    compositor,
    error::{CutoutError, Result},
    fallback::FallbackTuning,
    gate::GateThresholds,
    postprocess::PostProcessTuning,
    refine::RefinementTuning,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest accepted feather radius in pixels
pub const MAX_FEATHER_RADIUS: u32 = 50;

/// What replaces the removed background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// Transparent background
    #[default]
    Remove,
    /// Solid color from [`ProcessingSettings::background_color`]
    Color,
    /// Image from [`ProcessingSettings::background_image`]
    Image,
}

impl std::fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remove => write!(f, "remove"),
            Self::Color => write!(f, "color"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// How the primary segmentation backend is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    /// Pick from the product category
    #[default]
    Auto,
    /// Always start with this backend
    Explicit(BackendId),
}

/// Speed/quality trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    /// Single backend, no edge refinement
    Fast,
    /// Single backend with edge refinement
    #[default]
    High,
    /// Ensemble of up to three backends with edge refinement
    Ultra,
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::High => write!(f, "high"),
            Self::Ultra => write!(f, "ultra"),
        }
    }
}

/// Per-request processing flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub background_mode: BackgroundMode,

    /// `#RGB` or `#RRGGBB`, required for [`BackgroundMode::Color`]
    pub background_color: Option<String>,

    /// Background picture, required for [`BackgroundMode::Image`]
    pub background_image: Option<PathBuf>,

    pub backend_selection: BackendSelection,

    /// Cut interior holes (handles, rings) out of the mask
    pub preserve_holes: bool,

    pub edge_refinement: bool,

    /// Threshold the final alpha to {0, 255}
    pub force_binary_alpha: bool,

    /// Gaussian feather radius applied to the alpha last (0 = off)
    pub feather_radius: u32,

    /// Keep intermediate masks in the result
    pub debug_masks: bool,

    pub quality: QualityPreset,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            background_mode: BackgroundMode::Remove,
            background_color: None,
            background_image: None,
            backend_selection: BackendSelection::Auto,
            preserve_holes: true,
            edge_refinement: true,
            force_binary_alpha: true,
            feather_radius: 0,
            debug_masks: false,
            quality: QualityPreset::High,
        }
    }
}

impl ProcessingSettings {
    /// Create a new settings builder
    ///
    /// ```rust
    /// use imgly_cutout::{BackgroundMode, ProcessingSettings};
    ///
    /// let settings = ProcessingSettings::builder()
    ///     .background_color("#00FF00")
    ///     .feather_radius(2)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(settings.background_mode, BackgroundMode::Color);
    /// ```
    #[must_use]
    pub fn builder() -> ProcessingSettingsBuilder {
        ProcessingSettingsBuilder::default()
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| CutoutError::invalid_config(format!("Invalid settings JSON: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate all settings
    ///
    /// # Errors
    /// - Feather radius above [`MAX_FEATHER_RADIUS`]
    /// - Color mode without a color, or with one that is not `#RGB`/`#RRGGBB`
    /// - Image mode without a background path
    pub fn validate(&self) -> Result<()> {
        if self.feather_radius > MAX_FEATHER_RADIUS {
            return Err(CutoutError::config_value_error(
                "feather radius",
                self.feather_radius,
                &format!("0-{}", MAX_FEATHER_RADIUS),
                Some(0),
            ));
        }

        if let Some(color) = &self.background_color {
            compositor::parse_hex_color(color)?;
        }

        match self.background_mode {
            BackgroundMode::Color if self.background_color.is_none() => {
                Err(CutoutError::invalid_config(
                    "Color background mode requires a background color",
                ))
            },
            BackgroundMode::Image if self.background_image.is_none() => {
                Err(CutoutError::invalid_config(
                    "Image background mode requires a background image path",
                ))
            },
            _ => Ok(()),
        }
    }
}

/// Builder for [`ProcessingSettings`]
#[derive(Debug, Default)]
pub struct ProcessingSettingsBuilder {
    settings: ProcessingSettings,
}

impl ProcessingSettingsBuilder {
    #[must_use]
    pub fn background_mode(mut self, mode: BackgroundMode) -> Self {
        self.settings.background_mode = mode;
        self
    }

    /// Set a solid background color and switch to [`BackgroundMode::Color`]
    #[must_use]
    pub fn background_color<S: Into<String>>(mut self, color: S) -> Self {
        self.settings.background_color = Some(color.into());
        self.settings.background_mode = BackgroundMode::Color;
        self
    }

    /// Set a background picture and switch to [`BackgroundMode::Image`]
    #[must_use]
    pub fn background_image<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings.background_image = Some(path.into());
        self.settings.background_mode = BackgroundMode::Image;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendId) -> Self {
        self.settings.backend_selection = BackendSelection::Explicit(backend);
        self
    }

    #[must_use]
    pub fn backend_selection(mut self, selection: BackendSelection) -> Self {
        self.settings.backend_selection = selection;
        self
    }

    #[must_use]
    pub fn preserve_holes(mut self, preserve: bool) -> Self {
        self.settings.preserve_holes = preserve;
        self
    }

    #[must_use]
    pub fn edge_refinement(mut self, enabled: bool) -> Self {
        self.settings.edge_refinement = enabled;
        self
    }

    #[must_use]
    pub fn force_binary_alpha(mut self, binary: bool) -> Self {
        self.settings.force_binary_alpha = binary;
        self
    }

    #[must_use]
    pub fn feather_radius(mut self, radius: u32) -> Self {
        self.settings.feather_radius = radius;
        self
    }

    #[must_use]
    pub fn debug_masks(mut self, debug: bool) -> Self {
        self.settings.debug_masks = debug;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: QualityPreset) -> Self {
        self.settings.quality = quality;
        self
    }

    /// Build and validate the settings
    pub fn build(self) -> Result<ProcessingSettings> {
        let settings = self.settings;
        settings.validate()?;
        Ok(settings)
    }
}

/// Every tunable threshold of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTuning {
    pub quality: QualityThresholds,
    pub classifier: ClassifierThresholds,
    pub postprocess: PostProcessTuning,
    pub refinement: RefinementTuning,
    pub gate: GateThresholds,
    pub fallback: FallbackTuning,
}

impl PipelineTuning {
    /// Parse tuning from JSON; missing sections take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CutoutError::invalid_config(format!("Invalid tuning JSON: {}", e)))
    }
}

/// Retries allowed after the primary backend is rejected
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Processor-wide configuration fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub tuning: PipelineTuning,
    /// Upper bound on one backend call; `None` waits indefinitely
    pub backend_timeout: Option<Duration>,
    /// Backends tried after the first one is rejected by the gate
    pub max_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tuning: PipelineTuning::default(),
            backend_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::default()
    }
}

/// Builder for [`ProcessorConfig`]
#[derive(Debug, Default)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn tuning(mut self, tuning: PipelineTuning) -> Self {
        self.config.tuning = tuning;
        self
    }

    #[must_use]
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout = Some(timeout);
        self
    }

    /// Retries after the first backend; values above the default are clamped
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries.min(DEFAULT_MAX_RETRIES);
        self
    }

    pub fn build(self) -> Result<ProcessorConfig> {
        if self.config.backend_timeout == Some(Duration::ZERO) {
            return Err(CutoutError::invalid_config(
                "Backend timeout must be greater than zero",
            ));
        }
        Ok(self.config)
    }
}
