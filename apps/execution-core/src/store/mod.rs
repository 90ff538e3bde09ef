//! Durable position store.
//!
//! [`PositionStore`] is the persistence port. [`JsonFileStore`] keeps one
//! JSON document per profile and replaces it atomically on every write;
//! [`InMemoryStore`] backs tests. [`PositionBook`] sits in front of either
//! as the engine's write-through cache.

mod book;
mod in_memory;
mod json_file;

use std::path::PathBuf;

pub use book::{BookConfig, PositionBook};
pub use in_memory::InMemoryStore;
pub use json_file::JsonFileStore;

use crate::models::{CooldownEntry, PosKey, Position, TradeRecord};

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Write refused (injected or backend unavailable).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port for positions, cooldowns and trade history.
///
/// Every mutating call is durable when it returns `Ok`.
pub trait PositionStore: Send + Sync {
    /// Load one position.
    fn get(&self, key: &PosKey) -> Result<Option<Position>, StoreError>;

    /// Insert or replace a position.
    fn put(&self, position: &Position) -> Result<(), StoreError>;

    /// Remove a position. Removing a missing key succeeds.
    fn delete(&self, key: &PosKey) -> Result<(), StoreError>;

    /// All stored positions.
    fn list_all(&self) -> Result<Vec<Position>, StoreError>;

    /// Cooldown for a symbol.
    fn get_cooldown(&self, symbol: &str) -> Result<Option<CooldownEntry>, StoreError>;

    /// Insert or replace a cooldown.
    fn put_cooldown(&self, entry: &CooldownEntry) -> Result<(), StoreError>;

    /// Remove a cooldown.
    fn delete_cooldown(&self, symbol: &str) -> Result<(), StoreError>;

    /// All stored cooldowns.
    fn list_cooldowns(&self) -> Result<Vec<CooldownEntry>, StoreError>;

    /// Append a terminal record to the trade history.
    fn append_trade(&self, record: &TradeRecord) -> Result<(), StoreError>;

    /// Last `limit` trade records, oldest first.
    fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError>;
}
