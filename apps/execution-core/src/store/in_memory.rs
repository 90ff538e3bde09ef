//! Volatile store for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use super::{PositionStore, StoreError};
use crate::models::{CooldownEntry, PosKey, Position, TradeRecord};

/// In-memory [`PositionStore`] with write-failure injection.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    positions: RwLock<HashMap<PosKey, Position>>,
    cooldowns: RwLock<HashMap<String, CooldownEntry>>,
    trades: RwLock<Vec<TradeRecord>>,
    failing_writes: AtomicU32,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` mutating calls fail.
    pub fn set_failing_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl PositionStore for InMemoryStore {
    fn get(&self, key: &PosKey) -> Result<Option<Position>, StoreError> {
        Ok(self.positions.read().get(key).cloned())
    }

    fn put(&self, position: &Position) -> Result<(), StoreError> {
        self.check_write()?;
        self.positions
            .write()
            .insert(position.key.clone(), position.clone());
        Ok(())
    }

    fn delete(&self, key: &PosKey) -> Result<(), StoreError> {
        self.check_write()?;
        self.positions.write().remove(key);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.positions.read().values().cloned().collect())
    }

    fn get_cooldown(&self, symbol: &str) -> Result<Option<CooldownEntry>, StoreError> {
        Ok(self.cooldowns.read().get(symbol).cloned())
    }

    fn put_cooldown(&self, entry: &CooldownEntry) -> Result<(), StoreError> {
        self.check_write()?;
        self.cooldowns
            .write()
            .insert(entry.symbol.clone(), entry.clone());
        Ok(())
    }

    fn delete_cooldown(&self, symbol: &str) -> Result<(), StoreError> {
        self.check_write()?;
        self.cooldowns.write().remove(symbol);
        Ok(())
    }

    fn list_cooldowns(&self) -> Result<Vec<CooldownEntry>, StoreError> {
        Ok(self.cooldowns.read().values().cloned().collect())
    }

    fn append_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        self.check_write()?;
        self.trades.write().push(record.clone());
        Ok(())
    }

    fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let trades = self.trades.read();
        let skip = trades.len().saturating_sub(limit);
        Ok(trades[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = InMemoryStore::new();
        let position = Position::filled(
            PosKey::new("main", "BTCUSDT", "15m"),
            "BTCUSDT",
            "15m",
            PositionSide::Long,
            dec!(0.01),
            dec!(50000),
        );

        store.set_failing_writes(2);
        assert!(store.put(&position).is_err());
        assert!(store.put(&position).is_err());
        assert!(store.put(&position).is_ok());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }
}
