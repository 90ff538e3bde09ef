//! Reconciliation report.

use std::fmt::Display;

use serde::Serialize;
use tracing::warn;

use super::discrepancy::{Discrepancy, DiscrepancySeverity};

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// All discrepancies found.
    pub discrepancies: Vec<Discrepancy>,
    /// Venue positions in the snapshot.
    pub positions_compared: usize,
    /// Venue open orders in the snapshot.
    pub orders_compared: usize,
    /// FILLED records closed because the venue is flat.
    pub ghosts_closed: usize,
    /// PENDING records promoted to FILLED.
    pub pending_promoted: usize,
    /// PENDING records cancelled.
    pub pending_cancelled: usize,
    /// Records whose size or entry price was synced from the venue.
    pub quantities_synced: usize,
    /// Venue protective orders adopted onto records.
    pub protective_adopted: usize,
    /// Protective orders created.
    pub protective_created: usize,
    /// Protective ids cleared because the order was gone or oversized.
    pub stale_ids_cleared: usize,
    /// Venue positions adopted as new records.
    pub orphans_adopted: usize,
    /// Fill watchers restarted for resting entries.
    pub watchers_respawned: usize,
    /// Per-position failures. The pass continued past each.
    pub errors: Vec<String>,
    /// No errors and no critical discrepancies.
    pub passed: bool,
    /// Number of auto-resolved discrepancies.
    pub auto_resolved: usize,
    /// Completion timestamp (RFC 3339).
    pub completed_at: String,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconciliationReport {
    /// Check if there are any critical discrepancies.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.discrepancies
            .iter()
            .any(|d| d.severity == DiscrepancySeverity::Critical)
    }

    pub(super) fn push(&mut self, discrepancy: Discrepancy) {
        if discrepancy.auto_resolvable {
            self.auto_resolved += 1;
        }
        self.discrepancies.push(discrepancy);
    }

    pub(super) fn record_error(&mut self, identifier: &str, error: impl Display) {
        warn!(identifier, error = %error, "Reconciliation step failed");
        self.errors.push(format!("{identifier}: {error}"));
    }

    pub(super) fn finish(&mut self, duration_ms: u64) {
        self.passed = self.errors.is_empty() && !self.has_critical();
        self.completed_at = chrono::Utc::now().to_rfc3339();
        self.duration_ms = duration_ms;
    }
}
