//! Venue call retry and clock sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::{ClockConfig, ResilientConfig, RetryPolicy};

/// Retry wrapper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt for rate limits and transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Relative jitter, `0.2` = ±20%.
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
    /// Deadline per venue call in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Resync-and-retry rounds per call on clock skew.
    #[serde(default = "default_skew_retries")]
    pub max_skew_retries: u32,
    /// Clock sync settings.
    #[serde(default)]
    pub clock: ClockSyncConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_multiplier(),
            jitter_factor: default_jitter(),
            call_timeout_ms: default_call_timeout(),
            max_skew_retries: default_skew_retries(),
            clock: ClockSyncConfig::default(),
        }
    }
}

/// Clock offset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSyncConfig {
    /// Subtracted from every request timestamp, in milliseconds.
    #[serde(default = "default_safety_pad")]
    pub safety_pad_ms: u64,
    /// Minimum seconds between resyncs.
    #[serde(default = "default_min_resync")]
    pub min_resync_interval_secs: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            safety_pad_ms: default_safety_pad(),
            min_resync_interval_secs: default_min_resync(),
        }
    }
}

impl RetryConfig {
    /// Convert to the retry wrapper settings.
    #[must_use]
    pub fn to_resilient_config(&self) -> ResilientConfig {
        ResilientConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                backoff_multiplier: self.backoff_multiplier,
                jitter_factor: self.jitter_factor,
            },
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_skew_retries: self.max_skew_retries,
        }
    }

    /// Convert to the clock sync settings.
    #[must_use]
    pub const fn to_clock_config(&self) -> ClockConfig {
        ClockConfig {
            safety_pad: Duration::from_millis(self.clock.safety_pad_ms),
            min_resync_interval: Duration::from_secs(self.clock.min_resync_interval_secs),
        }
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff() -> u64 {
    100
}

const fn default_max_backoff() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.2
}

const fn default_call_timeout() -> u64 {
    10_000
}

const fn default_skew_retries() -> u32 {
    1
}

const fn default_safety_pad() -> u64 {
    500
}

const fn default_min_resync() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_to_internal() {
        let config = RetryConfig {
            max_attempts: 2,
            call_timeout_ms: 1_500,
            ..Default::default()
        };

        let resilient = config.to_resilient_config();
        assert_eq!(resilient.retry.max_attempts, 2);
        assert_eq!(resilient.call_timeout, Duration::from_millis(1_500));
        assert_eq!(resilient.max_skew_retries, 1);

        let clock = config.to_clock_config();
        assert_eq!(clock.safety_pad, Duration::from_millis(500));
        assert_eq!(clock.min_resync_interval, Duration::from_secs(10));
    }
}
