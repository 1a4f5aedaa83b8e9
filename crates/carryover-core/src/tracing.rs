//! Tracing setup for carryover transfer workers.
//!
//! Every crate logs through `tracing`; the binary hosting a transfer job
//! calls [`init_tracing`] once at startup.
//!
//! ```ignore
//! use carryover_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::worker())?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Crates whose events are governed by [`TracingConfig::level`].
const OWN_TARGETS: [&str; 2] = ["carryover_core", "carryover_transfer"];

/// HTTP stack crates, kept quieter than our own output.
const HTTP_TARGETS: [&str; 3] = ["reqwest", "hyper", "hyper_util"];

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    Pretty,
    /// Single-line output (default)
    #[default]
    Compact,
    /// One JSON object per event, with the current span's fields
    Json,
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the carryover crates
    pub level: Level,
    /// Level for the HTTP client stack
    pub http_level: Level,
    pub format: TracingOutputFormat,
    /// Log span open/close events, useful for timing import passes
    pub span_events: bool,
    /// Full filter directive; replaces both levels and `RUST_LOG`
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            http_level: Level::WARN,
            format: TracingOutputFormat::Compact,
            span_events: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Verbose, human-readable output for local runs.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            format: TracingOutputFormat::Pretty,
            ..Self::default()
        }
    }

    /// Structured output for long-running transfer workers.
    #[must_use]
    pub fn worker() -> Self {
        Self {
            format: TracingOutputFormat::Json,
            span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// The directive used when neither `filter` nor `RUST_LOG` is set.
    pub fn default_directive(&self) -> String {
        let own = OWN_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level));
        let http = HTTP_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.http_level));
        own.chain(http).collect::<Vec<_>>().join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        match self.filter {
            Some(ref filter) => Ok(EnvFilter::try_new(filter)?),
            None => Ok(EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(self.default_directive()))?),
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set or the filter
/// directive is invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = config.env_filter()?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        TracingOutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .boxed(),
        TracingOutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .boxed(),
        TracingOutputFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(span_events)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
