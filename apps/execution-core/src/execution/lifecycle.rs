//! Position lifecycle state machine.
//!
//! ```text
//! NONE ──► PENDING ──► FILLED ──► CLOSED
//!   │         │          ▲
//!   │         └──► CANCELLED
//!   └────────────────────┘  (market entries, adopted orphans)
//! ```
//!
//! Every status change on a [`Position`] goes through [`PositionLifecycle::apply`].

use std::fmt;

use crate::error::ExecutionError;
use crate::models::{Position, PositionStatus};

/// Lifecycle state, including the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No local record.
    None,
    /// Entry intent or resting entry order.
    Pending,
    /// Position open.
    Filled,
    /// Position exited.
    Closed,
    /// Entry abandoned.
    Cancelled,
}

impl LifecycleState {
    /// Whether no transition leaves this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl From<PositionStatus> for LifecycleState {
    fn from(status: PositionStatus) -> Self {
        match status {
            PositionStatus::Pending => Self::Pending,
            PositionStatus::Filled => Self::Filled,
            PositionStatus::Closed => Self::Closed,
            PositionStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl From<Option<PositionStatus>> for LifecycleState {
    fn from(status: Option<PositionStatus>) -> Self {
        status.map_or(Self::None, Self::from)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Pending => "PENDING",
            Self::Filled => "FILLED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Validates and applies lifecycle transitions.
pub struct PositionLifecycle;

impl PositionLifecycle {
    /// Check if a transition is allowed.
    #[must_use]
    pub const fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
        matches!(
            (from, to),
            (LifecycleState::None, LifecycleState::Pending)
                | (LifecycleState::None, LifecycleState::Filled)
                | (LifecycleState::Pending, LifecycleState::Filled)
                | (LifecycleState::Pending, LifecycleState::Cancelled)
                | (LifecycleState::Filled, LifecycleState::Closed)
        )
    }

    /// Validate a transition for the record at `key`.
    pub fn validate_transition(
        key: &str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), ExecutionError> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(ExecutionError::InvalidTransition {
                key: key.to_string(),
                from,
                to,
            })
        }
    }

    /// States reachable from `from`.
    #[must_use]
    pub fn valid_next_states(from: LifecycleState) -> Vec<LifecycleState> {
        match from {
            LifecycleState::None => vec![LifecycleState::Pending, LifecycleState::Filled],
            LifecycleState::Pending => vec![LifecycleState::Filled, LifecycleState::Cancelled],
            LifecycleState::Filled => vec![LifecycleState::Closed],
            LifecycleState::Closed | LifecycleState::Cancelled => vec![],
        }
    }

    /// Move an existing record to `to`. Leaving PENDING drops the entry
    /// order reference.
    pub fn apply(position: &mut Position, to: PositionStatus) -> Result<(), ExecutionError> {
        Self::validate_transition(
            position.key.as_str(),
            position.status.into(),
            to.into(),
        )?;
        if position.status == PositionStatus::Pending {
            position.pending = None;
        }
        position.status = to;
        position.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderKind, PendingOrderRef, PosKey, PositionSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::LifecycleState::{Cancelled, Closed, Filled, None as Absent, Pending};

    #[test_case(Absent, Pending, true ; "intent persisted")]
    #[test_case(Absent, Filled, true ; "market entry or adoption")]
    #[test_case(Pending, Filled, true ; "limit filled")]
    #[test_case(Pending, Cancelled, true ; "entry abandoned")]
    #[test_case(Filled, Closed, true ; "exit")]
    #[test_case(Absent, Closed, false ; "close without record")]
    #[test_case(Pending, Closed, false ; "close before fill")]
    #[test_case(Filled, Pending, false ; "fill reverted")]
    #[test_case(Filled, Cancelled, false ; "cancel after fill")]
    #[test_case(Closed, Filled, false ; "reopen closed")]
    #[test_case(Cancelled, Pending, false ; "revive cancelled")]
    fn test_transition_table(from: LifecycleState, to: LifecycleState, valid: bool) {
        assert_eq!(PositionLifecycle::is_valid_transition(from, to), valid);
    }

    #[test]
    fn test_next_states_agree_with_table() {
        let all = [Absent, Pending, Filled, Closed, Cancelled];
        for from in all {
            for to in all {
                assert_eq!(
                    PositionLifecycle::valid_next_states(from).contains(&to),
                    PositionLifecycle::is_valid_transition(from, to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_apply_promotes_pending_and_clears_order_ref() {
        let mut position = Position::pending(
            PosKey::new("main", "ETHUSDT", "1h"),
            "ETHUSDT",
            "1h",
            PositionSide::Long,
            PendingOrderRef {
                order_id: Some("o-1".to_string()),
                client_order_id: "c-1".to_string(),
                price: dec!(49000),
                quantity: dec!(2),
                order_kind: OrderKind::Limit,
                placed_at: Utc::now(),
            },
        );

        PositionLifecycle::apply(&mut position, PositionStatus::Filled).unwrap();

        assert_eq!(position.status, PositionStatus::Filled);
        assert!(position.pending.is_none());
    }

    #[test]
    fn test_apply_rejects_invalid_transition() {
        let mut position = Position::filled(
            PosKey::new("main", "BTCUSDT", "15m"),
            "BTCUSDT",
            "15m",
            PositionSide::Long,
            dec!(1),
            dec!(50000),
        );

        let err = PositionLifecycle::apply(&mut position, PositionStatus::Cancelled).unwrap_err();

        assert!(matches!(err, ExecutionError::InvalidTransition { .. }));
        assert_eq!(position.status, PositionStatus::Filled);
    }
}
