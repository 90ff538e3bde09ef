//! Execution engine errors.
//!
//! Venue and store failures convert in with `?`; the rest are raised by the
//! engine itself.

use thiserror::Error;

use crate::execution::LifecycleState;
use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Errors from entry, exit, protection and cancellation paths.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Venue call failed after the retry wrapper gave up.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Required durable write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local pre-trade validation failed. Nothing was sent to the venue.
    #[error("validation failed for {symbol}: {reason}")]
    Validation {
        /// Symbol being traded.
        symbol: String,
        /// What was wrong.
        reason: String,
    },

    /// Lifecycle transition not allowed.
    #[error("invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        /// Position key.
        key: String,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// No local record for the key.
    #[error("position not found: {0}")]
    PositionNotFound(String),
}

impl ExecutionError {
    /// Build a validation error.
    pub fn validation(symbol: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the underlying venue error was a credential failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Gateway(GatewayError::Auth { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ExecutionError::validation("BTCUSDT", "notional 3 below minimum 5");
        assert_eq!(
            err.to_string(),
            "validation failed for BTCUSDT: notional 3 below minimum 5"
        );

        let err = ExecutionError::InvalidTransition {
            key: "main_BTCUSDT_15m".to_string(),
            from: LifecycleState::Closed,
            to: LifecycleState::Filled,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for main_BTCUSDT_15m: CLOSED -> FILLED"
        );
    }

    #[test]
    fn test_gateway_conversion() {
        let err: ExecutionError = GatewayError::Auth {
            message: "invalid api key".to_string(),
        }
        .into();
        assert!(err.is_auth());
    }
}
