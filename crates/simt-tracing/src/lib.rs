//! Shared tracing configuration for the SIMT reconvergence workspace.
//!
//! Integration tests and benchmarks install their `tracing` subscriber
//! through this crate so the log surface is the same everywhere. Library
//! code only emits events and never installs a subscriber itself.
//!
//! ```rust
//! use simt_tracing::{build_subscriber, TracingConfig};
//!
//! let subscriber = build_subscriber(&TracingConfig::for_tests()).unwrap();
//! tracing::subscriber::with_default(subscriber, || {
//!     tracing::debug!(pc = 4, "branch diverged");
//! });
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// How the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `simt_reconverge=debug`). When absent
    /// `RUST_LOG` is consulted, then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    pub ansi: bool,
    /// Span lifecycle events to emit. `CLOSE` reports how long each
    /// `perf_span!` lived.
    pub span_events: FmtSpan,
    pub output: TracingOutput,
    /// Write through libtest's capture instead of stdout.
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for local runs.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            test_writer: false,
        }
    }

    /// JSON without colour, for CI and log collectors.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Trace-level workspace output, compact and captured by libtest.
    pub fn for_tests() -> Self {
        Self {
            directives: Some("simt_reconverge=trace,simt_tracing=trace".to_string()),
            ansi: false,
            output: TracingOutput::Compact,
            test_writer: true,
            ..Self::for_local()
        }
    }

    /// Debug-level JSON with span close timings, for profiling emulator runs.
    pub fn for_performance() -> Self {
        Self {
            directives: Some("simt_reconverge=debug,simt_tracing=debug".to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `SIMT_TRACING_PROFILE` - `local` (default), `ci`, `test` or `performance`
    /// - `SIMT_TRACING_DIRECTIVES` - overrides the filter directives
    /// - `SIMT_TRACING_FORMAT` - `pretty`, `compact`, or `json`
    pub fn from_env() -> Self {
        let profile = env::var("SIMT_TRACING_PROFILE").unwrap_or_default().to_ascii_lowercase();
        let mut config = match profile.trim() {
            "ci" => Self::for_ci(),
            "test" => Self::for_tests(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("SIMT_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Some(output) = env::var("SIMT_TRACING_FORMAT")
            .ok()
            .and_then(|value| TracingOutput::from_env_value(&value))
        {
            config.output = output;
        }

        config
    }

    fn filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        if self.test_writer {
            BoxMakeWriter::new(TestWriter::new())
        } else {
            BoxMakeWriter::new(std::io::stdout)
        }
    }
}

/// Errors raised while installing the shared subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),

    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for the given configuration without installing it.
///
/// Pair with `tracing::subscriber::set_default` to scope it to one thread.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.filter()?;
    let base = tracing_fmt::layer()
        .with_writer(config.writer())
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => base.compact().with_ansi(config.ansi).boxed(),
        TracingOutput::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
        TracingOutput::Json => base.json().with_ansi(false).boxed(),
    };

    Ok(Registry::default().with(output).with(filter))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Formatter used for the output layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}
