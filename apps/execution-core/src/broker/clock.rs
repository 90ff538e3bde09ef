//! Venue clock offset tracking.
//!
//! Signed requests carry a timestamp the venue checks against its own
//! clock. `ClockSync` keeps the offset (server - local) and hands out
//! request timestamps shifted back by a safety pad so clock jitter cannot
//! push a request into the future.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Clock sync settings.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Subtracted from every request timestamp.
    pub safety_pad: Duration,
    /// Resyncs closer together than this are skipped.
    pub min_resync_interval: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            safety_pad: Duration::from_millis(500),
            min_resync_interval: Duration::from_secs(10),
        }
    }
}

/// Shared venue clock offset. One per process, handed to every venue adapter.
#[derive(Debug)]
pub struct ClockSync {
    offset_ms: AtomicI64,
    last_attempt: Mutex<Option<Instant>>,
    config: ClockConfig,
}

impl ClockSync {
    /// Create with a zero offset.
    #[must_use]
    pub fn new(config: ClockConfig) -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
            last_attempt: Mutex::new(None),
            config,
        }
    }

    /// Current offset (server - local) in milliseconds.
    #[must_use]
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Timestamp to sign the next request with.
    #[must_use]
    pub fn request_timestamp_ms(&self) -> i64 {
        let pad = i64::try_from(self.config.safety_pad.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis() + self.offset_ms() - pad
    }

    /// Record a server time sample taken between `sent_ms` and `received_ms`
    /// (local epoch millis). The server is assumed to have stamped the
    /// response at the round-trip midpoint. Returns the new offset.
    pub fn record_sync(&self, server_ms: i64, sent_ms: i64, received_ms: i64) -> i64 {
        let midpoint = sent_ms + (received_ms - sent_ms) / 2;
        let offset = server_ms - midpoint;
        let previous = self.offset_ms.swap(offset, Ordering::AcqRel);
        info!(
            offset_ms = offset,
            previous_offset_ms = previous,
            rtt_ms = received_ms - sent_ms,
            "Venue clock offset updated"
        );
        offset
    }

    /// Claim the right to resync now. Returns `false` when the last attempt
    /// was more recent than `min_resync_interval`.
    pub fn try_begin_resync(&self) -> bool {
        let mut last = self.last_attempt.lock();
        if let Some(at) = *last {
            if at.elapsed() < self.config.min_resync_interval {
                debug!(
                    since_last_ms = at.elapsed().as_millis() as u64,
                    "Clock resync skipped, too soon"
                );
                return false;
            }
        }
        *last = Some(Instant::now());
        true
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sync_uses_midpoint() {
        let clock = ClockSync::default();
        // request left at 1000, came back at 1200, server said 2100 -> midpoint 1100
        let offset = clock.record_sync(2100, 1000, 1200);
        assert_eq!(offset, 1000);
        assert_eq!(clock.offset_ms(), 1000);
    }

    #[test]
    fn test_request_timestamp_applies_offset_and_pad() {
        let clock = ClockSync::new(ClockConfig {
            safety_pad: Duration::from_millis(500),
            min_resync_interval: Duration::ZERO,
        });
        clock.record_sync(10_000, 0, 0);

        let local = Utc::now().timestamp_millis();
        let ts = clock.request_timestamp_ms();
        let expected = local + 10_000 - 500;
        assert!((ts - expected).abs() < 1_000, "ts={ts} expected~{expected}");
    }

    #[test]
    fn test_negative_offset() {
        let clock = ClockSync::default();
        assert_eq!(clock.record_sync(500, 1000, 1000), -500);
    }

    #[test]
    fn test_resync_rate_limited() {
        let clock = ClockSync::new(ClockConfig {
            safety_pad: Duration::ZERO,
            min_resync_interval: Duration::from_secs(60),
        });
        assert!(clock.try_begin_resync());
        assert!(!clock.try_begin_resync());
    }

    #[test]
    fn test_resync_allowed_without_interval() {
        let clock = ClockSync::new(ClockConfig {
            safety_pad: Duration::ZERO,
            min_resync_interval: Duration::ZERO,
        });
        assert!(clock.try_begin_resync());
        assert!(clock.try_begin_resync());
    }
}
