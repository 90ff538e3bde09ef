//! Prometheus metrics for the execution engine.
//!
//! Counters and gauges for entries, exits, protective orders,
//! reconciliation passes, venue retries and store failures. Recording is a
//! no-op until [`init_metrics`] installs the exporter.
//!
//! # Example
//!
//! ```ignore
//! use execution_core::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_exit("stop_loss", true);
//! ```

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for reconciliation duration (in seconds).
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // 10ms to 30s
            duration_buckets: vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.duration_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
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

// ============================================================================
// Position Lifecycle Metrics
// ============================================================================

/// Record an entry attempt.
///
/// # Arguments
///
/// * `symbol` - Venue symbol
/// * `outcome` - `submitted`, `filled`, `failed`, `cancelled` or a skip reason
pub fn record_entry(symbol: &str, outcome: &str) {
    counter!(
        "entries_total",
        "symbol" => symbol.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a closed position.
pub fn record_exit(reason: &str, is_loss: bool) {
    counter!(
        "exits_total",
        "reason" => reason.to_string(),
        "loss" => is_loss.to_string()
    )
    .increment(1);
}

/// Record a protective order placed by the engine.
pub fn record_protective_order(leg: &str) {
    counter!("protective_orders_total", "leg" => leg.to_string()).increment(1);
}

/// Record a market close issued instead of a protective order.
pub fn record_preempted_exit(reason: &str) {
    counter!("preempted_exits_total", "reason" => reason.to_string()).increment(1);
}

/// Record a cooldown start.
pub fn record_cooldown_set(symbol: &str) {
    counter!("cooldowns_total", "symbol" => symbol.to_string()).increment(1);
}

/// Update the FILLED position gauge.
#[allow(clippy::cast_precision_loss)] // position counts are small
pub fn update_open_positions(count: usize) {
    gauge!("open_positions").set(count as f64);
}

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Record a completed reconciliation pass.
#[allow(clippy::cast_precision_loss)] // discrepancy counts and durations are small
pub fn record_reconciliation(passed: bool, discrepancies: usize, duration_ms: u64) {
    counter!(
        "reconciliation_runs_total",
        "passed" => passed.to_string()
    )
    .increment(1);
    counter!("reconciliation_discrepancies_total").increment(discrepancies as u64);
    histogram!("reconciliation_duration_seconds").record(duration_ms as f64 / 1000.0);
}

// ============================================================================
// Venue and Store Metrics
// ============================================================================

/// Record a retried venue call.
///
/// # Arguments
///
/// * `venue` - Venue name
/// * `op` - Gateway operation (e.g., "create_order")
/// * `category` - Retry category (e.g., "rate_limit", "clock_skew")
pub fn record_gateway_retry(venue: &str, op: &str, category: &str) {
    counter!(
        "gateway_retries_total",
        "venue" => venue.to_string(),
        "op" => op.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record a venue call that failed after the retry wrapper gave up.
pub fn record_gateway_failure(venue: &str, op: &str, kind: &str) {
    counter!(
        "gateway_failures_total",
        "venue" => venue.to_string(),
        "op" => op.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a store write that exhausted its retries.
pub fn record_store_write_failure(op: &str) {
    counter!("store_write_failures_total", "op" => op.to_string()).increment(1);
}
