//! Restart recovery and scheduler tests using the JSON file store.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{ACCOUNT, engine_config, reconciliation_config};
use execution_core::execution::{
    EngineDeps, EntryOutcome, ExecutionEngine, ReconcileTrigger, Reconciler, Scheduler,
    SchedulerConfig, TickOutcome,
};
use execution_core::gateway::{ExchangeGateway, PaperExchange};
use execution_core::models::{
    EntryType, ExitReason, PosKey, PositionSide, PositionStatus, SignalError, SignalSource,
    TradeSignal,
};
use execution_core::notify::LogNotifier;
use execution_core::store::{BookConfig, JsonFileStore, PositionBook, PositionStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn engine_on(dir: &std::path::Path, venue: &Arc<PaperExchange>) -> Arc<ExecutionEngine> {
    let store: Arc<dyn PositionStore> = Arc::new(JsonFileStore::open(dir).unwrap());
    let book = Arc::new(PositionBook::load(store, BookConfig::default()).unwrap());
    let gateway: Arc<dyn ExchangeGateway> = venue.clone();
    Arc::new(ExecutionEngine::new(
        engine_config(),
        EngineDeps {
            gateway,
            book,
            notifier: Arc::new(LogNotifier),
        },
        ReconcileTrigger::new(),
        CancellationToken::new(),
    ))
}

/// Signals a market long with fixed levels on every evaluation.
struct AlwaysLong;

#[async_trait]
impl SignalSource for AlwaysLong {
    async fn evaluate(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<TradeSignal>, SignalError> {
        Ok(Some(TradeSignal {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            side: PositionSide::Long,
            entry_type: EntryType::Market,
            price: None,
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
            confidence: 0.9,
            signals: vec!["breakout".to_string()],
            snapshot: serde_json::Value::Null,
        }))
    }
}

#[tokio::test]
async fn test_restart_restores_positions_without_duplicate_orders() {
    let dir = tempfile::tempdir().unwrap();
    let venue = Arc::new(PaperExchange::new("paper"));
    venue.set_price("BTCUSDT", dec!(50000));

    let key = PosKey::new(ACCOUNT, "BTCUSDT", "15m");
    {
        let engine = engine_on(dir.path(), &venue);
        let scheduler = Scheduler::new(
            Arc::clone(&engine),
            Arc::new(AlwaysLong),
            SchedulerConfig::default(),
        );
        let outcome = scheduler.evaluate_once("BTCUSDT", "15m").await.unwrap();
        assert!(matches!(outcome, TickOutcome::Entry(EntryOutcome::Filled(_))));
    }
    let placed = venue.created_order_count();
    assert_eq!(placed, 3);

    let engine = engine_on(dir.path(), &venue);
    let restored = engine.book().get(&key).unwrap();
    assert_eq!(restored.status, PositionStatus::Filled);
    assert!(restored.stop_loss_order_id.is_some());
    assert_eq!(restored.metadata.signals, vec!["breakout".to_string()]);

    let report = Reconciler::new(Arc::clone(&engine), reconciliation_config())
        .reconcile()
        .await
        .unwrap();

    assert!(report.passed);
    assert!(report.discrepancies.is_empty());
    assert_eq!(venue.created_order_count(), placed);
}

#[tokio::test]
async fn test_scheduler_exits_then_cools_down() {
    let dir = tempfile::tempdir().unwrap();
    let venue = Arc::new(PaperExchange::new("paper"));
    venue.set_price("BTCUSDT", dec!(50000));
    let engine = engine_on(dir.path(), &venue);
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        Arc::new(AlwaysLong),
        SchedulerConfig::default(),
    );

    scheduler.evaluate_once("BTCUSDT", "15m").await.unwrap();
    let idle = scheduler.evaluate_once("BTCUSDT", "15m").await.unwrap();
    assert!(matches!(idle, TickOutcome::Idle));

    // The resting stop fires on the venue; the local record sees the stop
    // price on the next tick.
    venue.set_price("BTCUSDT", dec!(48900));
    let exited = scheduler.evaluate_once("BTCUSDT", "15m").await.unwrap();
    assert!(matches!(exited, TickOutcome::Exited(ExitReason::StopLoss)));

    let trades = engine.book().recent_trades(1).unwrap();
    assert!(trades[0].is_loss);
    assert!(trades[0].realized_pnl.unwrap() < Decimal::ZERO);

    let blocked = scheduler.evaluate_once("BTCUSDT", "15m").await.unwrap();
    assert!(matches!(
        blocked,
        TickOutcome::Entry(EntryOutcome::Skipped(
            execution_core::execution::SkipReason::Cooldown
        ))
    ));

    // Cooldown survives a restart.
    let reopened = engine_on(dir.path(), &venue);
    assert!(reopened.cooldowns().is_active("BTCUSDT").await);
}
