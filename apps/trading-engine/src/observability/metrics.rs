//! Prometheus metrics for the trading engine.
//!
//! Covers order submission and fills, connection health and reconnects,
//! risk events and circuit breakers, and live trading controls.
//!
//! # Example
//!
//! ```ignore
//! use trading_engine::observability::{init_metrics, MetricsConfig};
//!
//! let config = MetricsConfig::default();
//! init_metrics(&config).expect("Failed to initialize metrics");
//!
//! record_order_submission("paper", "submitted", "market", 0.012);
//! ```

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // Latency buckets from 1ms to 10s (order submit round trips)
            latency_buckets: vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0],
        }
    }
}

impl MetricsConfig {
    /// Create a metrics configuration with a custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server exposing metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g. port in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

// ============================================================================
// Order Metrics
// ============================================================================

/// Record an order submission outcome.
///
/// # Arguments
///
/// * `broker` - Broker adapter name (e.g. "paper")
/// * `status` - Outcome (e.g. "submitted", "rejected", "retries_exhausted")
/// * `kind` - Order kind (e.g. "market", "limit")
/// * `latency_seconds` - Time from dequeue to broker ACK
pub fn record_order_submission(broker: &str, status: &str, kind: &str, latency_seconds: f64) {
    counter!(
        "order_submissions_total",
        "broker" => broker.to_string(),
        "status" => status.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);

    histogram!(
        "order_submit_latency_seconds",
        "broker" => broker.to_string(),
        "kind" => kind.to_string()
    )
    .record(latency_seconds);
}

/// Record an execution tranche observed by reconciliation.
pub fn record_order_fill(broker: &str, symbol: &str, quantity: f64) {
    counter!(
        "order_fills_total",
        "broker" => broker.to_string(),
        "symbol" => symbol.to_string()
    )
    .increment(1);

    histogram!(
        "order_fill_quantity",
        "broker" => broker.to_string()
    )
    .record(quantity);
}

/// Record an order rejection.
pub fn record_order_rejection(broker: &str, reason: &str) {
    counter!(
        "order_rejections_total",
        "broker" => broker.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Update the pending (submitted, not yet terminal) orders gauge.
pub fn update_pending_orders(broker: &str, count: usize) {
    gauge!("pending_orders", "broker" => broker.to_string()).set(count as f64);
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Connection health values for the gauge.
pub mod connection_health {
    /// No latency samples yet.
    pub const UNKNOWN: f64 = 0.0;
    /// Rolling latency at or above 1s.
    pub const POOR: f64 = 1.0;
    /// Rolling latency below 1s.
    pub const FAIR: f64 = 2.0;
    /// Rolling latency below 300ms.
    pub const GOOD: f64 = 3.0;
    /// Rolling latency below 100ms.
    pub const EXCELLENT: f64 = 4.0;
}

/// Update the connection health gauge.
pub fn update_connection_health(broker: &str, health: f64) {
    gauge!("connection_health", "broker" => broker.to_string()).set(health);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt(broker: &str) {
    counter!(
        "reconnect_attempts_total",
        "broker" => broker.to_string()
    )
    .increment(1);
}

/// Record a detected disconnect.
pub fn record_disconnect(broker: &str) {
    counter!(
        "disconnects_total",
        "broker" => broker.to_string()
    )
    .increment(1);
}

// ============================================================================
// Risk Metrics
// ============================================================================

/// Record a risk event.
pub fn record_risk_event(kind: &str, severity: &str) {
    counter!(
        "risk_events_total",
        "kind" => kind.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// Circuit breaker state values for the gauge.
pub mod breaker_state {
    /// Armed, not triggered.
    pub const ARMED: f64 = 0.0;
    /// Triggered and latched.
    pub const TRIGGERED: f64 = 1.0;
}

/// Update a circuit breaker state gauge.
pub fn update_breaker_state(breaker: &str, state: f64) {
    gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(state);
}

/// Record a trade blocked by the trade limiter.
pub fn record_trade_blocked(rule: &str) {
    counter!(
        "trades_blocked_total",
        "rule" => rule.to_string()
    )
    .increment(1);
}

/// Record an emergency stop invocation.
pub fn record_emergency_stop() {
    counter!("emergency_stops_total").increment(1);
}

/// Update the open positions gauge.
pub fn update_open_positions(count: usize) {
    gauge!("open_positions").set(count as f64);
}

/// Update the account equity gauge.
pub fn update_account_equity(equity: f64) {
    gauge!("account_equity").set(equity);
}

/// Update the margin usage gauge (fraction of equity).
pub fn update_margin_usage(fraction: f64) {
    gauge!("margin_usage_ratio").set(fraction);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(!config.latency_buckets.is_empty());
    }

    #[test]
    fn test_config_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = MetricsConfig::with_addr(addr);
        assert_eq!(config.listen_addr.port(), 8080);
    }

    // The record functions must not panic without an installed recorder.

    #[test]
    fn test_record_order_metrics() {
        record_order_submission("paper", "submitted", "market", 0.012);
        record_order_fill("paper", "AAPL", 10.0);
        record_order_rejection("paper", "insufficient_funds");
        update_pending_orders("paper", 3);
    }

    #[test]
    fn test_record_connection_metrics() {
        update_connection_health("paper", connection_health::EXCELLENT);
        record_reconnect_attempt("paper");
        record_disconnect("paper");
    }

    #[test]
    fn test_record_risk_metrics() {
        record_risk_event("circuit_breaker", "critical");
        update_breaker_state("daily_loss", breaker_state::TRIGGERED);
        record_trade_blocked("max_daily_trades");
        record_emergency_stop();
        update_open_positions(2);
        update_account_equity(100_000.0);
        update_margin_usage(0.35);
    }

    #[test]
    fn test_health_gauge_ordering() {
        assert!(connection_health::EXCELLENT > connection_health::GOOD);
        assert!(connection_health::GOOD > connection_health::FAIR);
        assert!(connection_health::FAIR > connection_health::POOR);
        assert!(connection_health::POOR > connection_health::UNKNOWN);
    }
}
