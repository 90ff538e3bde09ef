//! Discrepancy types for reconciliation.
//!
//! One [`Discrepancy`] per difference found between a local record and the
//! venue, including the action taken for it.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What kind of difference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyType {
    /// FILLED locally, flat on the venue.
    GhostPosition,
    /// PENDING entry whose order is no longer open.
    PendingResolved,
    /// Venue size or entry price differs from the local record.
    QuantityMismatch,
    /// Recorded protective order no longer open.
    StaleProtectiveOrder,
    /// Recorded protective order larger than the position.
    OversizedProtectiveOrder,
    /// Untracked venue protective order attached to a position.
    ProtectiveAdopted,
    /// Venue position with no local record.
    OrphanPosition,
    /// Position left without a protective leg.
    UnprotectedLeg,
}

/// Severity of discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
pub enum DiscrepancySeverity {
    /// Informational only.
    Info,
    /// Warning, may need attention.
    Warning,
    /// Critical, requires immediate action.
    Critical,
}

/// A detected discrepancy between local and venue state.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    /// Type of discrepancy.
    pub discrepancy_type: DiscrepancyType,
    /// Position key or order id.
    pub identifier: String,
    /// Local state description.
    pub local_state: String,
    /// Venue state description.
    pub broker_state: String,
    /// Severity level.
    pub severity: DiscrepancySeverity,
    /// Whether the pass resolved it.
    pub auto_resolvable: bool,
    /// Action taken or suggested.
    pub suggested_action: String,
    /// Detection timestamp (RFC 3339).
    pub detected_at: String,
}

impl Discrepancy {
    /// A discrepancy the pass resolved itself.
    pub fn resolved(
        discrepancy_type: DiscrepancyType,
        identifier: impl Into<String>,
        local_state: impl Into<String>,
        broker_state: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            discrepancy_type,
            identifier: identifier.into(),
            local_state: local_state.into(),
            broker_state: broker_state.into(),
            severity: DiscrepancySeverity::Info,
            auto_resolvable: true,
            suggested_action: action.into(),
            detected_at: Utc::now().to_rfc3339(),
        }
    }

    /// A discrepancy left for the operator.
    pub fn unresolved(
        discrepancy_type: DiscrepancyType,
        identifier: impl Into<String>,
        local_state: impl Into<String>,
        broker_state: impl Into<String>,
        severity: DiscrepancySeverity,
        action: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            auto_resolvable: false,
            ..Self::resolved(discrepancy_type, identifier, local_state, broker_state, action)
        }
    }

    /// Override severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: DiscrepancySeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrepancy_severity_ordering() {
        assert!(DiscrepancySeverity::Info < DiscrepancySeverity::Warning);
        assert!(DiscrepancySeverity::Warning < DiscrepancySeverity::Critical);
    }

    #[test]
    fn test_unresolved_keeps_severity() {
        let discrepancy = Discrepancy::unresolved(
            DiscrepancyType::UnprotectedLeg,
            "main_BTCUSDT_15m",
            "stop_loss missing",
            "no order",
            DiscrepancySeverity::Critical,
            "place stop-loss manually",
        );

        assert!(!discrepancy.auto_resolvable);
        assert_eq!(discrepancy.severity, DiscrepancySeverity::Critical);
        assert_eq!(discrepancy.identifier, "main_BTCUSDT_15m");
    }

    #[test]
    fn test_type_serializes_snake_case() {
        let json = serde_json::to_string(&DiscrepancyType::GhostPosition).unwrap();
        assert_eq!(json, "\"ghost_position\"");
    }
}
