//! Retry policies with exponential backoff for venue API calls.
//!
//! This module provides retry configuration, backoff calculation and
//! classification of venue error text into [`GatewayError`] variants.
//!
//! # Retryable Errors
//!
//! | Retried | Propagated |
//! |---------|------------|
//! | Rate limited (backoff, honours retry-after) | Invalid parameters / rejected |
//! | Network failures, timeouts | Auth errors |
//! | Timestamp outside recv window (after resync) | Order not found |
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_core::broker::{RetryPolicy, ExponentialBackoffCalculator};
//!
//! let policy = RetryPolicy::default();
//! let mut backoff = ExponentialBackoffCalculator::new(&policy);
//!
//! let delay1 = backoff.next_backoff(); // ~100ms with jitter
//! let delay2 = backoff.next_backoff(); // ~200ms with jitter
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

/// Retry policy configuration for venue API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (default: 5).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 30s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            jitter_factor: policy.jitter_factor,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` if max attempts exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt += 1;

        Some(Duration::from_millis(capped_ms))
    }

    /// Use a venue-provided delay for this attempt if there is one,
    /// otherwise the computed backoff. Both consume an attempt.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        match retry_after {
            Some(delay) if self.has_remaining_attempts() => {
                self.current_attempt += 1;
                Some(delay.min(Duration::from_millis(self.max_backoff_ms)))
            }
            Some(_) => None,
            None => self.next_backoff(),
        }
    }

    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Full jitter: random value in [backoff * (1 - jitter), backoff * (1 + jitter)]
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;

        rng.random_range(min..=max) as u64
    }

    /// Get the current attempt number.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }
}

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient failure, back off and retry.
    Retryable,
    /// Permanent failure, propagate.
    NonRetryable,
    /// Rate limited - use retry-after if available.
    RateLimited,
    /// Request timestamp rejected - resync the clock, then retry.
    ClockSkew,
}

impl ErrorCategory {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non_retryable",
            Self::RateLimited => "rate_limited",
            Self::ClockSkew => "clock_skew",
        }
    }
}

/// Map venue error text to a [`GatewayError`].
///
/// Venue adapters call this on the message body of failed responses.
#[must_use]
pub fn classify_venue_error(error_message: &str) -> GatewayError {
    let lower = error_message.to_lowercase();
    let message = error_message.to_string();

    // Timestamp / recv window (Binance -1021, Bybit 10002, OKX 50102)
    if lower.contains("recvwindow")
        || lower.contains("recv_window")
        || lower.contains("timestamp for this request")
        || lower.contains("timestamp expired")
        || lower.contains("-1021")
        || lower.contains("invalid request timestamp")
    {
        return GatewayError::ClockSkew { message };
    }

    if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("-1003")
    {
        return GatewayError::RateLimited {
            message,
            retry_after: None,
        };
    }

    if lower.contains("unauthorized")
        || lower.contains("invalid api")
        || lower.contains("api-key")
        || lower.contains("signature")
        || lower.contains("permission denied")
        || lower.contains("forbidden")
    {
        return GatewayError::Auth { message };
    }

    if lower.contains("unknown order")
        || lower.contains("order does not exist")
        || lower.contains("order not found")
        || lower.contains("-2011")
        || lower.contains("-2013")
    {
        return GatewayError::NotFound { message };
    }

    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("dns")
        || lower.contains("temporary failure")
        || lower.contains("network")
        || lower.contains("socket")
        || lower.contains("broken pipe")
        || lower.contains("service unavailable")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
    {
        return GatewayError::Network { message };
    }

    if lower.contains("invalid")
        || lower.contains("bad request")
        || lower.contains("insufficient")
        || lower.contains("margin")
        || lower.contains("min notional")
        || lower.contains("notional")
        || lower.contains("precision")
        || lower.contains("reduceonly")
        || lower.contains("reduce-only")
        || lower.contains("rejected")
        || lower.contains("validation")
    {
        return GatewayError::Rejected { message };
    }

    GatewayError::Venue { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((policy.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1600)));

        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_max_backoff_cap() {
        let policy = RetryPolicy {
            max_attempts: 20,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 10.0,
            jitter_factor: 0.0,
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_range() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let mut backoff = ExponentialBackoffCalculator::new(&policy);
            let duration = backoff
                .next_backoff()
                .expect("first backoff should always succeed");

            assert!(
                duration >= Duration::from_millis(80) && duration <= Duration::from_millis(120),
                "Duration {duration:?} not in expected range 80-120ms"
            );
        }
    }

    #[test]
    fn test_retry_after_consumes_attempt() {
        let policy = RetryPolicy {
            max_attempts: 1,
            jitter_factor: 0.0,
            ..Default::default()
        };
        let mut backoff = ExponentialBackoffCalculator::new(&policy);
        assert_eq!(
            backoff.next_delay(Some(Duration::from_secs(2))),
            Some(Duration::from_secs(2))
        );
        assert!(backoff.next_delay(Some(Duration::from_secs(2))).is_none());
    }

    #[test_case("Timestamp for this request is outside of the recvWindow.", ErrorCategory::ClockSkew ; "binance recv window")]
    #[test_case("rate limit exceeded", ErrorCategory::RateLimited ; "rate limit")]
    #[test_case("connection reset by peer", ErrorCategory::Retryable ; "network")]
    #[test_case("Margin is insufficient.", ErrorCategory::NonRetryable ; "insufficient margin")]
    #[test_case("Unknown order sent.", ErrorCategory::NonRetryable ; "unknown order")]
    #[test_case("Invalid API-key, IP, or permissions for action.", ErrorCategory::NonRetryable ; "auth")]
    fn test_classification_category(message: &str, expected: ErrorCategory) {
        assert_eq!(classify_venue_error(message).category(), expected);
    }

    #[test]
    fn test_classification_variants() {
        assert!(classify_venue_error("Unknown order sent.").is_not_found());
        assert!(classify_venue_error("Invalid API-key, IP, or permissions").is_auth());
        assert!(matches!(
            classify_venue_error("Filter failure: MIN_NOTIONAL"),
            GatewayError::Rejected { .. }
        ));
        assert!(matches!(
            classify_venue_error("something odd happened"),
            GatewayError::Venue { .. }
        ));
    }
}
