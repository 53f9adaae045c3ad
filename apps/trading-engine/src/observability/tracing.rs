//! Structured log initialization.
//!
//! One `tracing-subscriber` registry with an env-filter layer
//! (`RUST_LOG` wins over the configured default) and a fmt layer.
//! Initialization is idempotent-safe for tests via `try_init`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `"info"`).
    pub default_directive: String,
    /// Include the emitting module target in each line.
    pub with_target: bool,
    /// ANSI colors (disable when logs go to a collector).
    pub with_ansi: bool,
    /// Emit one JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            with_target: true,
            with_ansi: true,
            json: false,
        }
    }
}

impl TracingConfig {
    /// Config with a custom default filter directive.
    #[must_use]
    pub fn with_directive(directive: impl Into<String>) -> Self {
        Self {
            default_directive: directive.into(),
            ..Default::default()
        }
    }
}

/// Error type for tracing initialization.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to initialize the subscriber (usually already set).
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberError(String),
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`TracingError::SubscriberError`] if a global subscriber is
/// already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive.clone()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.with_target)
                    .with_ansi(config.with_ansi),
            )
            .try_init()
    };
    result.map_err(|e| TracingError::SubscriberError(e.to_string()))
}
