//! Observability: log initialization and Prometheus metrics.

pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
pub use tracing::{TracingConfig, TracingError, init_tracing};
