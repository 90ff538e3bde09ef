//! Per-symbol re-entry cooldowns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blocks new entries on a symbol until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    /// Venue symbol.
    pub symbol: String,
    /// Why the cooldown was set.
    pub reason: String,
    /// When it was set.
    pub created_at: DateTime<Utc>,
    /// When entries are allowed again.
    pub expires_at: DateTime<Utc>,
}

impl CooldownEntry {
    /// Whether the cooldown has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
