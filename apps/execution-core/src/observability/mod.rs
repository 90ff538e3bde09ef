//! Observability module for metrics.
//!
//! Prometheus export and the counters recorded by the engine, the retry
//! wrapper and the position store. Log setup lives in [`crate::telemetry`].

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_cooldown_set, record_entry, record_exit,
    record_gateway_failure, record_gateway_retry, record_preempted_exit, record_protective_order,
    record_reconciliation, record_store_write_failure, update_open_positions,
};
