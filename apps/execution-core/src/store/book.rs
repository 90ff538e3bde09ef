//! Write-through cache in front of a [`PositionStore`].
//!
//! The engine reads positions and cooldowns from memory and writes through
//! to the store with a bounded retry. Two write flavours:
//!
//! - [`PositionBook::put_durable`]: the caller needs the write on disk before
//!   it touches the venue. Exhaustion is an error and the cache is unchanged.
//! - [`PositionBook::persist`] and friends: best effort. The cache always
//!   moves forward; a failed write is logged and counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use super::{PositionStore, StoreError};
use crate::models::{CooldownEntry, PosKey, Position, PositionStatus, TradeRecord};
use crate::observability::record_store_write_failure;

/// Retry settings for store writes.
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Total attempts per write, including the first.
    pub write_attempts: u32,
    /// Pause between attempts.
    pub write_backoff: Duration,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            write_attempts: 3,
            write_backoff: Duration::from_millis(50),
        }
    }
}

/// Cached view of one profile's positions and cooldowns.
pub struct PositionBook {
    store: Arc<dyn PositionStore>,
    config: BookConfig,
    positions: RwLock<HashMap<PosKey, Position>>,
    cooldowns: RwLock<HashMap<String, CooldownEntry>>,
}

impl PositionBook {
    /// Load every position and cooldown from `store`.
    pub fn load(store: Arc<dyn PositionStore>, config: BookConfig) -> Result<Self, StoreError> {
        let positions = store
            .list_all()?
            .into_iter()
            .map(|p| (p.key.clone(), p))
            .collect::<HashMap<_, _>>();
        let cooldowns = store
            .list_cooldowns()?
            .into_iter()
            .map(|c| (c.symbol.clone(), c))
            .collect::<HashMap<_, _>>();

        debug!(
            positions = positions.len(),
            cooldowns = cooldowns.len(),
            "Position book loaded"
        );

        Ok(Self {
            store,
            config,
            positions: RwLock::new(positions),
            cooldowns: RwLock::new(cooldowns),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Cached position.
    #[must_use]
    pub fn get(&self, key: &PosKey) -> Option<Position> {
        self.positions.read().get(key).cloned()
    }

    /// All cached positions, ordered by key.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<_> = self.positions.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Cached positions in `status`, ordered by key.
    #[must_use]
    pub fn positions_with_status(&self, status: PositionStatus) -> Vec<Position> {
        self.positions()
            .into_iter()
            .filter(|p| p.status == status)
            .collect()
    }

    /// Cached cooldown for `symbol`, expired or not.
    #[must_use]
    pub fn cooldown(&self, symbol: &str) -> Option<CooldownEntry> {
        self.cooldowns.read().get(symbol).cloned()
    }

    /// All cached cooldowns.
    #[must_use]
    pub fn cooldowns(&self) -> Vec<CooldownEntry> {
        self.cooldowns.read().values().cloned().collect()
    }

    /// Last `limit` archived trades.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        self.store.recent_trades(limit)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write `position` and wait until it is durable. On exhaustion the
    /// error is returned and the cache keeps its previous value.
    pub async fn put_durable(&self, position: &Position) -> Result<(), StoreError> {
        self.write_with_retry("put", position.key.as_str(), |store| store.put(position))
            .await?;
        self.positions
            .write()
            .insert(position.key.clone(), position.clone());
        Ok(())
    }

    /// Update the cache, then write through best-effort. Returns whether the
    /// write reached the store.
    pub async fn persist(&self, position: &Position) -> bool {
        self.positions
            .write()
            .insert(position.key.clone(), position.clone());
        self.best_effort("put", position.key.as_str(), |store| store.put(position))
            .await
    }

    /// Drop a position from the cache and the store.
    pub async fn remove(&self, key: &PosKey) -> bool {
        self.positions.write().remove(key);
        self.best_effort("delete", key.as_str(), |store| store.delete(key))
            .await
    }

    /// Append a terminal record to the trade history.
    pub async fn archive(&self, record: &TradeRecord) -> bool {
        self.best_effort("append_trade", record.key.as_str(), |store| {
            store.append_trade(record)
        })
        .await
    }

    /// Insert or replace a cooldown.
    pub async fn put_cooldown(&self, entry: &CooldownEntry) -> bool {
        self.cooldowns
            .write()
            .insert(entry.symbol.clone(), entry.clone());
        self.best_effort("put_cooldown", &entry.symbol, |store| {
            store.put_cooldown(entry)
        })
        .await
    }

    /// Remove a cooldown.
    pub async fn remove_cooldown(&self, symbol: &str) -> bool {
        self.cooldowns.write().remove(symbol);
        self.best_effort("delete_cooldown", symbol, |store| {
            store.delete_cooldown(symbol)
        })
        .await
    }

    async fn best_effort<F>(&self, op: &'static str, id: &str, write: F) -> bool
    where
        F: Fn(&dyn PositionStore) -> Result<(), StoreError>,
    {
        match self.write_with_retry(op, id, write).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    op,
                    id,
                    error = %e,
                    "Store write failed, continuing with in-memory state"
                );
                false
            }
        }
    }

    async fn write_with_retry<F>(&self, op: &'static str, id: &str, write: F) -> Result<(), StoreError>
    where
        F: Fn(&dyn PositionStore) -> Result<(), StoreError>,
    {
        let attempts = self.config.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match write(self.store.as_ref()) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(op, id, attempt, error = %e, "Store write failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.write_backoff).await;
                }
                Err(e) => {
                    record_store_write_failure(op);
                    return Err(e);
                }
            }
        }
    }
}
