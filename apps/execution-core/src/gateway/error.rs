//! Venue error taxonomy.

use std::time::Duration;

use crate::broker::ErrorCategory;

/// Errors surfaced by an [`ExchangeGateway`](super::ExchangeGateway).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Request timestamp rejected (outside the venue's receive window).
    #[error("timestamp outside recv window: {message}")]
    ClockSkew {
        /// Venue error text.
        message: String,
    },

    /// Rate limited by the venue.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Venue error text.
        message: String,
        /// Venue-provided wait, when known.
        retry_after: Option<Duration>,
    },

    /// Transport failure.
    #[error("network error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Deadline that elapsed.
        elapsed_ms: u64,
    },

    /// Request refused as invalid (bad params, insufficient margin, below minimums).
    #[error("rejected: {message}")]
    Rejected {
        /// Venue error text.
        message: String,
    },

    /// Order or resource does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Venue error text.
        message: String,
    },

    /// Credentials rejected.
    #[error("authentication failed: {message}")]
    Auth {
        /// Venue error text.
        message: String,
    },

    /// Anything the classifier could not place.
    #[error("venue error: {message}")]
    Venue {
        /// Venue error text.
        message: String,
    },
}

impl GatewayError {
    /// Retry category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ClockSkew { .. } => ErrorCategory::ClockSkew,
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Network { .. } | Self::Timeout { .. } => ErrorCategory::Retryable,
            Self::Rejected { .. } | Self::NotFound { .. } | Self::Auth { .. } | Self::Venue { .. } => {
                ErrorCategory::NonRetryable
            }
        }
    }

    /// "Order does not exist" and friends.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Credential failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Venue-provided retry delay.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ClockSkew { .. } => "clock_skew",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::NotFound { .. } => "not_found",
            Self::Auth { .. } => "auth",
            Self::Venue { .. } => "venue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let skew = GatewayError::ClockSkew {
            message: "Timestamp for this request is outside of the recvWindow".to_string(),
        };
        assert_eq!(skew.category(), ErrorCategory::ClockSkew);

        let limited = GatewayError::RateLimited {
            message: "too many requests".to_string(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(limited.category(), ErrorCategory::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        assert_eq!(
            GatewayError::Timeout { elapsed_ms: 10 }.category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            GatewayError::NotFound {
                message: "unknown order".to_string()
            }
            .category(),
            ErrorCategory::NonRetryable
        );
    }

    #[test]
    fn test_display() {
        let err = GatewayError::Auth {
            message: "invalid api key".to_string(),
        };
        assert_eq!(err.to_string(), "authentication failed: invalid api key");
        assert!(err.is_auth());
        assert!(!err.is_not_found());
    }
}
