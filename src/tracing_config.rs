//! Tracing subscriber setup for host applications
//!
//! The library itself only emits events; hosts that want the crate to
//! install a subscriber enable the `tracing-init` feature and call
//! [`TracingConfig::init`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    #[default]
    Console,
    /// Compact output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Overrides `verbosity` when set, e.g. `imgly_cutout=debug`
    pub env_filter: Option<String>,
    /// Correlation id logged once after initialization
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Use a fresh random session id
    #[must_use]
    pub fn with_generated_session_id(mut self) -> Self {
        self.session_id = Some(uuid::Uuid::new_v4().to_string());
        self
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber was already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(false)
                        .with_level(true)
                        .compact(),
                )
                .try_init()?,
            TracingFormat::Compact => registry
                .with(fmt::layer().with_ansi(false).with_target(false).compact())
                .try_init()?,
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                .try_init()?,
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 Cutout session started");
        }
        Ok(())
    }
}

/// Install an env-filtered subscriber unless one is already set
pub fn init_library_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish(),
    )
    .is_ok()
    {
        tracing::debug!("📚 Library tracing initialized");
    }
}
