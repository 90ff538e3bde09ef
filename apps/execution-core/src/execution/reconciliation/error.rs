//! Reconciliation error types.

use crate::gateway::GatewayError;

/// Errors that abort a whole reconciliation pass.
///
/// Per-position failures do not abort the pass; they are collected in
/// [`ReconciliationReport::errors`](super::ReconciliationReport::errors).
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    /// Venue positions or open orders could not be fetched.
    #[error("failed to fetch venue snapshot: {0}")]
    Snapshot(#[source] GatewayError),
}
