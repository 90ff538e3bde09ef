//! Shared fixtures: a paper venue, an in-memory store and an engine wired
//! to both.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use execution_core::execution::{
    EngineConfig, EngineDeps, ExecutionEngine, ReconcileTrigger, ReconciliationConfig, Reconciler,
};
use execution_core::gateway::{ExchangeGateway, PaperExchange, VenuePosition};
use execution_core::models::{PosKey, Position, PositionSide};
use execution_core::notify::LogNotifier;
use execution_core::store::{BookConfig, InMemoryStore, PositionBook, PositionStore};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

pub const ACCOUNT: &str = "main";

pub struct Harness {
    pub venue: Arc<PaperExchange>,
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<ExecutionEngine>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(engine_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let venue = Arc::new(PaperExchange::new("paper"));
        let gateway: Arc<dyn ExchangeGateway> = venue.clone();
        Self::with_gateway(venue, gateway, config)
    }

    pub fn with_gateway(
        venue: Arc<PaperExchange>,
        gateway: Arc<dyn ExchangeGateway>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn PositionStore> = store.clone();
        let book_config = BookConfig {
            write_attempts: 2,
            write_backoff: std::time::Duration::from_millis(1),
        };
        let book = Arc::new(PositionBook::load(dyn_store, book_config).unwrap());
        let shutdown = CancellationToken::new();
        let engine = Arc::new(ExecutionEngine::new(
            config,
            EngineDeps {
                gateway,
                book,
                notifier: Arc::new(LogNotifier),
            },
            ReconcileTrigger::new(),
            shutdown.clone(),
        ));
        Self {
            venue,
            store,
            engine,
            shutdown,
        }
    }

    pub fn reconciler(&self, config: ReconciliationConfig) -> Reconciler {
        Reconciler::new(Arc::clone(&self.engine), config)
    }

    pub fn key(&self, symbol: &str, timeframe: &str) -> PosKey {
        PosKey::new(ACCOUNT, symbol, timeframe)
    }

    /// Seed a FILLED record and the matching venue position.
    pub async fn seed_filled(&self, position: Position) -> Position {
        self.venue.insert_position(VenuePosition {
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            leverage: position.leverage,
            unrealized_pnl: Decimal::ZERO,
        });
        self.engine.book().put_durable(&position).await.unwrap();
        position
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Engine settings with watchers that never tick during a test.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        account: ACCOUNT.to_string(),
        default_stop_loss_pct: None,
        default_take_profit_pct: None,
        fill_poll_interval: std::time::Duration::from_secs(3600),
        ..EngineConfig::default()
    }
}

/// Reconciliation settings without a ghost grace period.
pub fn reconciliation_config() -> ReconciliationConfig {
    ReconciliationConfig {
        ghost_grace_period: chrono::Duration::zero(),
        ..ReconciliationConfig::default()
    }
}

pub fn long(key: PosKey, symbol: &str, quantity: Decimal, entry: Decimal) -> Position {
    let timeframe = key
        .as_str()
        .rsplit('_')
        .next()
        .unwrap_or("15m")
        .to_string();
    Position::filled(key, symbol, timeframe, PositionSide::Long, quantity, entry)
}
