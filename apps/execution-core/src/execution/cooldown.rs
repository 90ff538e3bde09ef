//! Per-symbol re-entry cooldowns after losing exits.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::CooldownEntry;
use crate::observability::record_cooldown_set;
use crate::store::PositionBook;

/// Sets and checks cooldowns, persisting them through the book.
pub struct CooldownManager {
    book: Arc<PositionBook>,
    duration: Duration,
}

impl CooldownManager {
    /// Manager with a fixed cooldown window.
    #[must_use]
    pub fn new(book: Arc<PositionBook>, duration: Duration) -> Self {
        Self { book, duration }
    }

    /// Cooldown window.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Start a cooldown on `symbol` now.
    pub async fn set(&self, symbol: &str, reason: &str) -> CooldownEntry {
        self.set_at(symbol, reason, Utc::now()).await
    }

    /// Start a cooldown on `symbol` at `now`.
    pub async fn set_at(&self, symbol: &str, reason: &str, now: DateTime<Utc>) -> CooldownEntry {
        let entry = CooldownEntry {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            created_at: now,
            expires_at: now + self.duration,
        };
        self.book.put_cooldown(&entry).await;
        record_cooldown_set(symbol);
        info!(
            symbol,
            reason,
            expires_at = %entry.expires_at,
            "Cooldown set"
        );
        entry
    }

    /// Whether `symbol` is cooling down now.
    pub async fn is_active(&self, symbol: &str) -> bool {
        self.is_active_at(symbol, Utc::now()).await
    }

    /// Whether `symbol` is cooling down at `now`. An expired entry is purged.
    pub async fn is_active_at(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.book.cooldown(symbol) else {
            return false;
        };
        if entry.is_expired_at(now) {
            debug!(symbol, "Cooldown expired");
            self.book.remove_cooldown(symbol).await;
            return false;
        }
        true
    }

    /// Time left on the cooldown for `symbol`.
    #[must_use]
    pub fn remaining(&self, symbol: &str) -> Option<Duration> {
        self.remaining_at(symbol, Utc::now())
    }

    /// Time left on the cooldown for `symbol` at `now`.
    #[must_use]
    pub fn remaining_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.book
            .cooldown(symbol)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.expires_at - now)
    }

    /// Drop every expired cooldown. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// Drop every cooldown expired at `now`.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<_> = self
            .book
            .cooldowns()
            .into_iter()
            .filter(|entry| entry.is_expired_at(now))
            .collect();
        for entry in &expired {
            self.book.remove_cooldown(&entry.symbol).await;
        }
        expired.len()
    }
}
