//! Integration tests for venue reconciliation.
//!
//! Each test seeds local records and a paper venue that disagree, runs one
//! pass and checks the local state converged.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Harness, long, reconciliation_config};
use execution_core::broker::{ClockSync, ResilientConfig, ResilientGateway, RetryPolicy};
use execution_core::execution::reconciliation::{
    DiscrepancySeverity, DiscrepancyType, ReconciliationError, ReconciliationReport,
};
use execution_core::execution::ReconciliationConfig;
use execution_core::gateway::{
    ExchangeGateway, OrderRequest, OrderSnapshot, PaperExchange, TradeFill, VenuePosition,
};
use execution_core::models::{
    ExitReason, OrderKind, OrderSide, OrderStatus, PendingOrderRef, Position, PositionSide,
    PositionStatus,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn protective(id: &str, symbol: &str, kind: OrderKind, quantity: Decimal, trigger: Decimal) -> OrderSnapshot {
    OrderSnapshot {
        id: id.to_string(),
        client_order_id: None,
        symbol: symbol.to_string(),
        side: OrderSide::Sell,
        kind,
        class: kind.class(),
        status: OrderStatus::Open,
        quantity,
        filled_quantity: Decimal::ZERO,
        price: None,
        trigger_price: Some(trigger),
        average_price: None,
        reduce_only: true,
        created_at: Utc::now(),
    }
}

// ============================================
// Ghosts
// ============================================

#[tokio::test]
async fn test_ghost_closes_at_exit_fill_and_sets_cooldown() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    let position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000))
        .with_stop_loss(dec!(49000))
        .with_take_profit(dec!(55000));
    h.engine.book().put_durable(&position).await.unwrap();

    // Venue is flat; the account history shows the exit.
    h.venue.insert_trade(TradeFill {
        id: "t-1".to_string(),
        order_id: "external-1".to_string(),
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Sell,
        price: dec!(48950),
        quantity: dec!(1),
        timestamp: Utc::now(),
    });

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.ghosts_closed, 1);
    assert!(h.engine.book().get(&key).is_none());

    let trades = h.engine.book().recent_trades(10).unwrap();
    assert_eq!(trades.len(), 1);
    let record = &trades[0];
    assert_eq!(record.status, PositionStatus::Closed);
    assert_eq!(record.exit_price, Some(dec!(48950)));
    assert_eq!(record.realized_pnl, Some(dec!(-1050)));
    assert_eq!(record.reason, Some(ExitReason::ExchangeSync));
    assert!(record.is_loss);

    assert!(h.engine.book().cooldown("BTCUSDT").is_some());
    assert!(h.engine.cooldowns().is_active("BTCUSDT").await);
}

#[tokio::test]
async fn test_ghost_exit_attributed_to_recorded_stop() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    let mut position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000)).with_stop_loss(dec!(49000));
    position.stop_loss_order_id = Some("sl-7".to_string());
    h.engine.book().put_durable(&position).await.unwrap();

    h.venue.insert_trade(TradeFill {
        id: "t-1".to_string(),
        order_id: "sl-7".to_string(),
        symbol: "BTCUSDT".to_string(),
        side: OrderSide::Sell,
        price: dec!(48990),
        quantity: dec!(1),
        timestamp: Utc::now(),
    });

    h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    let trades = h.engine.book().recent_trades(10).unwrap();
    assert_eq!(trades[0].reason, Some(ExitReason::StopLoss));
}

#[tokio::test]
async fn test_ghost_without_fills_uses_last_price() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    let position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000));
    h.engine.book().put_durable(&position).await.unwrap();
    h.venue.set_price("BTCUSDT", dec!(50500));

    h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    let trades = h.engine.book().recent_trades(10).unwrap();
    assert_eq!(trades[0].exit_price, Some(dec!(50500)));
    assert_eq!(trades[0].reason, Some(ExitReason::ExchangeSyncUnverified));
    assert!(!trades[0].is_loss);
    assert!(h.engine.book().cooldown("BTCUSDT").is_none());
}

#[tokio::test]
async fn test_recent_record_inside_grace_period_is_kept() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    let position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000));
    h.engine.book().put_durable(&position).await.unwrap();

    let config = ReconciliationConfig {
        ghost_grace_period: chrono::Duration::minutes(5),
        ..ReconciliationConfig::default()
    };
    let report = h.reconciler(config).reconcile().await.unwrap();

    assert_eq!(report.ghosts_closed, 0);
    assert_eq!(
        h.engine.book().get(&key).map(|p| p.status),
        Some(PositionStatus::Filled)
    );
}

// ============================================
// Pending entries
// ============================================

#[tokio::test]
async fn test_pending_promoted_at_venue_entry_price() {
    let h = Harness::new();
    let key = h.key("ETHUSDT", "15m");
    let pending = Position::pending(
        key.clone(),
        "ETHUSDT",
        "15m",
        PositionSide::Long,
        PendingOrderRef {
            order_id: Some("gone-1".to_string()),
            client_order_id: "c-eth".to_string(),
            price: dec!(49000),
            quantity: dec!(2),
            order_kind: OrderKind::Limit,
            placed_at: Utc::now(),
        },
    );
    h.engine.book().put_durable(&pending).await.unwrap();
    h.venue.insert_position(VenuePosition {
        symbol: "ETHUSDT".to_string(),
        side: PositionSide::Long,
        quantity: dec!(2),
        entry_price: dec!(49005),
        leverage: 1,
        unrealized_pnl: Decimal::ZERO,
    });

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.pending_promoted, 1);
    assert_eq!(report.orphans_adopted, 0);
    let promoted = h.engine.book().get(&key).unwrap();
    assert_eq!(promoted.status, PositionStatus::Filled);
    assert_eq!(promoted.entry_price, dec!(49005));
    assert_eq!(promoted.quantity, dec!(2));
}

#[tokio::test]
async fn test_pending_without_order_or_position_is_cancelled() {
    let h = Harness::new();
    let key = h.key("ETHUSDT", "15m");
    let pending = Position::pending(
        key.clone(),
        "ETHUSDT",
        "15m",
        PositionSide::Long,
        PendingOrderRef {
            order_id: Some("gone-1".to_string()),
            client_order_id: "c-eth".to_string(),
            price: dec!(3000),
            quantity: dec!(1),
            order_kind: OrderKind::Limit,
            placed_at: Utc::now(),
        },
    );
    h.engine.book().put_durable(&pending).await.unwrap();

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.pending_cancelled, 1);
    assert!(h.engine.book().get(&key).is_none());
    let trades = h.engine.book().recent_trades(1).unwrap();
    assert_eq!(trades[0].status, PositionStatus::Cancelled);
}

#[tokio::test]
async fn test_pending_order_id_recovered_by_client_id() {
    let h = Harness::new();
    let key = h.key("ETHUSDT", "15m");
    h.venue.insert_order(OrderSnapshot {
        id: "venue-42".to_string(),
        client_order_id: Some("c-eth".to_string()),
        symbol: "ETHUSDT".to_string(),
        side: OrderSide::Buy,
        kind: OrderKind::Limit,
        class: OrderKind::Limit.class(),
        status: OrderStatus::Open,
        quantity: dec!(1),
        filled_quantity: Decimal::ZERO,
        price: Some(dec!(3000)),
        trigger_price: None,
        average_price: None,
        reduce_only: false,
        created_at: Utc::now(),
    });
    let pending = Position::pending(
        key.clone(),
        "ETHUSDT",
        "15m",
        PositionSide::Long,
        PendingOrderRef {
            order_id: None,
            client_order_id: "c-eth".to_string(),
            price: dec!(3000),
            quantity: dec!(1),
            order_kind: OrderKind::Limit,
            placed_at: Utc::now(),
        },
    );
    h.engine.book().put_durable(&pending).await.unwrap();

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    let position = h.engine.book().get(&key).unwrap();
    assert_eq!(position.status, PositionStatus::Pending);
    assert_eq!(position.entry_order_id.as_deref(), Some("venue-42"));
    assert_eq!(report.watchers_respawned, 1);
    assert!(h.engine.is_watching(&key));
}

// ============================================
// Protection and size
// ============================================

#[tokio::test]
async fn test_existing_protective_orders_adopted_without_new_orders() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.seed_filled(
        long(key.clone(), "BTCUSDT", dec!(1), dec!(50000))
            .with_stop_loss(dec!(49000))
            .with_take_profit(dec!(55000)),
    )
    .await;
    h.venue.insert_order(protective("sl-1", "BTCUSDT", OrderKind::StopMarket, dec!(1), dec!(49000)));
    h.venue.insert_order(protective(
        "tp-1",
        "BTCUSDT",
        OrderKind::TakeProfitMarket,
        dec!(1),
        dec!(55000),
    ));

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    let position = h.engine.book().get(&key).unwrap();
    assert_eq!(position.stop_loss_order_id.as_deref(), Some("sl-1"));
    assert_eq!(position.take_profit_order_id.as_deref(), Some("tp-1"));
    assert_eq!(report.protective_adopted, 2);
    assert_eq!(report.protective_created, 0);
    assert_eq!(h.venue.created_order_count(), 0);
    assert!(report.passed);
}

#[tokio::test]
async fn test_adopted_trigger_fills_missing_level() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.seed_filled(long(key.clone(), "BTCUSDT", dec!(1), dec!(50000))).await;
    h.venue.insert_order(protective("sl-1", "BTCUSDT", OrderKind::StopMarket, dec!(1), dec!(48500)));

    h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    let position = h.engine.book().get(&key).unwrap();
    assert_eq!(position.stop_loss, Some(dec!(48500)));
    assert_eq!(position.stop_loss_order_id.as_deref(), Some("sl-1"));
}

#[tokio::test]
async fn test_missing_protection_is_placed() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    h.seed_filled(
        long(key.clone(), "BTCUSDT", dec!(0.5), dec!(50000))
            .with_stop_loss(dec!(49000))
            .with_take_profit(dec!(55000)),
    )
    .await;

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.protective_created, 2);
    let position = h.engine.book().get(&key).unwrap();
    assert!(position.stop_loss_order_id.is_some());
    assert!(position.take_profit_order_id.is_some());
    let open = h.venue.open_orders_for("BTCUSDT");
    assert_eq!(open.len(), 2);
    assert!(open.iter().all(|o| o.quantity == dec!(0.5) && o.reduce_only));
}

#[tokio::test]
async fn test_stale_protective_id_cleared_and_replaced() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    let mut position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000)).with_stop_loss(dec!(49000));
    position.stop_loss_order_id = Some("long-gone".to_string());
    h.seed_filled(position).await;

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.stale_ids_cleared, 1);
    assert!(report
        .discrepancies
        .iter()
        .any(|d| d.discrepancy_type == DiscrepancyType::StaleProtectiveOrder));
    let position = h.engine.book().get(&key).unwrap();
    let replacement = position.stop_loss_order_id.unwrap();
    assert_ne!(replacement, "long-gone");
    assert_eq!(h.venue.created_order_count(), 1);
}

#[tokio::test]
async fn test_quantity_synced_and_oversized_stop_replaced() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    let mut position = long(key.clone(), "BTCUSDT", dec!(1), dec!(50000)).with_stop_loss(dec!(49000));
    position.stop_loss_order_id = Some("sl-1".to_string());
    h.seed_filled(position).await;
    h.venue.insert_order(protective("sl-1", "BTCUSDT", OrderKind::StopMarket, dec!(1), dec!(49000)));

    // Partially closed elsewhere.
    h.venue.insert_position(VenuePosition {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Long,
        quantity: dec!(0.6),
        entry_price: dec!(50000),
        leverage: 1,
        unrealized_pnl: Decimal::ZERO,
    });

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert_eq!(report.quantities_synced, 1);
    let position = h.engine.book().get(&key).unwrap();
    assert_eq!(position.quantity, dec!(0.6));
    let new_stop = position.stop_loss_order_id.unwrap();
    assert_ne!(new_stop, "sl-1");

    let open = h.venue.open_orders_for("BTCUSDT");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, new_stop);
    assert_eq!(open[0].quantity, dec!(0.6));
}

#[tokio::test]
async fn test_unprotected_leg_reported_when_auto_create_disabled() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.seed_filled(long(key, "BTCUSDT", dec!(1), dec!(50000)).with_stop_loss(dec!(49000)))
        .await;

    let config = ReconciliationConfig {
        auto_create_protection: false,
        ..reconciliation_config()
    };
    let report = h.reconciler(config).reconcile().await.unwrap();

    assert!(!report.passed);
    assert!(report.has_critical());
    assert!(report.discrepancies.iter().any(|d| {
        d.discrepancy_type == DiscrepancyType::UnprotectedLeg
            && d.severity == DiscrepancySeverity::Critical
    }));
    assert_eq!(h.venue.created_order_count(), 0);
}

#[tokio::test]
async fn test_second_pass_is_quiet() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    h.seed_filled(
        long(key, "BTCUSDT", dec!(1), dec!(50000))
            .with_stop_loss(dec!(49000))
            .with_take_profit(dec!(55000)),
    )
    .await;

    let reconciler = h.reconciler(reconciliation_config());
    reconciler.reconcile().await.unwrap();
    let placed = h.venue.created_order_count();
    let second = reconciler.reconcile().await.unwrap();

    assert_eq!(h.venue.created_order_count(), placed);
    assert!(second.discrepancies.is_empty());
    assert!(second.passed);
}

// ============================================
// Orphans
// ============================================

#[tokio::test]
async fn test_orphan_adopted_with_default_levels() {
    let h = Harness::new();
    h.venue.set_price("SOLUSDT", dec!(100));
    h.venue.insert_position(VenuePosition {
        symbol: "SOLUSDT".to_string(),
        side: PositionSide::Short,
        quantity: dec!(10),
        entry_price: dec!(100),
        leverage: 3,
        unrealized_pnl: Decimal::ZERO,
    });

    let config = ReconciliationConfig {
        orphan_stop_loss_pct: Some(dec!(0.05)),
        orphan_take_profit_pct: Some(dec!(0.1)),
        ..reconciliation_config()
    };
    let report = h.reconciler(config).reconcile().await.unwrap();

    assert_eq!(report.orphans_adopted, 1);
    let key = h.key("SOLUSDT", "1h");
    let position = h.engine.book().get(&key).unwrap();
    assert!(position.adopted);
    assert_eq!(position.status, PositionStatus::Filled);
    assert_eq!(position.side, PositionSide::Short);
    assert_eq!(position.leverage, 3);
    assert_eq!(position.stop_loss, Some(dec!(105)));
    assert_eq!(position.take_profit, Some(dec!(90)));
    assert!(position.stop_loss_order_id.is_some());
    assert!(position.take_profit_order_id.is_some());
}

#[tokio::test]
async fn test_orphan_left_alone_when_adoption_disabled() {
    let h = Harness::new();
    h.venue.insert_position(VenuePosition {
        symbol: "SOLUSDT".to_string(),
        side: PositionSide::Long,
        quantity: dec!(10),
        entry_price: dec!(100),
        leverage: 1,
        unrealized_pnl: Decimal::ZERO,
    });

    let config = ReconciliationConfig {
        adopt_orphans: false,
        ..reconciliation_config()
    };
    let report = h.reconciler(config).reconcile().await.unwrap();

    assert_eq!(report.orphans_adopted, 0);
    assert!(h.engine.book().positions().is_empty());
}

// ============================================
// Passes overlapping engine work
// ============================================

/// Start a pass while the caller holds `key`'s lock, so the pass takes its
/// snapshot and then waits on the lock.
async fn pass_blocked_on(
    h: &Harness,
) -> tokio::task::JoinHandle<Result<ReconciliationReport, ReconciliationError>> {
    let reconciler = h.reconciler(reconciliation_config());
    let pass = tokio::spawn(async move { reconciler.reconcile().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pass.is_finished());
    pass
}

#[tokio::test]
async fn test_entry_order_placed_during_pass_is_kept() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    let mut intent = Position::pending(
        key.clone(),
        "BTCUSDT",
        "15m",
        PositionSide::Long,
        PendingOrderRef {
            order_id: None,
            client_order_id: "c-btc".to_string(),
            price: dec!(49500),
            quantity: dec!(0.01),
            order_kind: OrderKind::Limit,
            placed_at: Utc::now(),
        },
    );
    h.engine.book().put_durable(&intent).await.unwrap();

    let guard = h.engine.lock_position(&key).await;
    let pass = pass_blocked_on(&h).await;

    let mut order = OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(0.01), dec!(49500));
    order.client_order_id = "c-btc".to_string();
    let ack = h.venue.create_order(&order).await.unwrap();
    intent.entry_order_id = Some(ack.order_id.clone());
    if let Some(pending) = intent.pending.as_mut() {
        pending.order_id = Some(ack.order_id.clone());
    }
    h.engine.book().put_durable(&intent).await.unwrap();
    drop(guard);

    let report = pass.await.unwrap().unwrap();

    assert_eq!(report.pending_cancelled, 0);
    let kept = h.engine.book().get(&key).unwrap();
    assert_eq!(kept.status, PositionStatus::Pending);
    assert_eq!(kept.entry_order_id.as_deref(), Some(ack.order_id.as_str()));
    assert_eq!(h.venue.open_orders_for("BTCUSDT").len(), 1);
}

#[tokio::test]
async fn test_protection_placed_during_pass_is_not_duplicated() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    let mut position = h
        .seed_filled(
            long(key.clone(), "BTCUSDT", dec!(1), dec!(50000))
                .with_stop_loss(dec!(49000))
                .with_take_profit(dec!(52000)),
        )
        .await;

    let guard = h.engine.lock_position(&key).await;
    let pass = pass_blocked_on(&h).await;

    h.venue.insert_order(protective("sl-late", "BTCUSDT", OrderKind::StopMarket, dec!(1), dec!(49000)));
    h.venue.insert_order(protective(
        "tp-late",
        "BTCUSDT",
        OrderKind::TakeProfitMarket,
        dec!(1),
        dec!(52000),
    ));
    position.stop_loss_order_id = Some("sl-late".to_string());
    position.take_profit_order_id = Some("tp-late".to_string());
    h.engine.book().put_durable(&position).await.unwrap();
    drop(guard);

    let report = pass.await.unwrap().unwrap();

    assert_eq!(report.stale_ids_cleared, 0);
    assert_eq!(report.protective_created, 0);
    assert_eq!(h.venue.open_orders_for("BTCUSDT").len(), 2);
    assert_eq!(h.venue.created_order_count(), 0);
    let kept = h.engine.book().get(&key).unwrap();
    assert_eq!(kept.stop_loss_order_id.as_deref(), Some("sl-late"));
    assert_eq!(kept.take_profit_order_id.as_deref(), Some("tp-late"));
}

#[tokio::test]
async fn test_position_filled_during_pass_is_not_a_ghost() {
    let h = Harness::new();
    let key = h.key("BTCUSDT", "15m");
    h.venue.set_price("BTCUSDT", dec!(50000));
    h.engine
        .book()
        .put_durable(&long(key.clone(), "BTCUSDT", dec!(1), dec!(50000)))
        .await
        .unwrap();

    let guard = h.engine.lock_position(&key).await;
    let pass = pass_blocked_on(&h).await;

    h.venue.insert_position(VenuePosition {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Long,
        quantity: dec!(1),
        entry_price: dec!(50000),
        leverage: 1,
        unrealized_pnl: Decimal::ZERO,
    });
    drop(guard);

    let report = pass.await.unwrap().unwrap();

    assert_eq!(report.ghosts_closed, 0);
    assert_eq!(h.engine.book().get(&key).unwrap().status, PositionStatus::Filled);
}

// ============================================
// Venue errors
// ============================================

#[tokio::test]
async fn test_snapshot_failure_aborts_pass() {
    let h = Harness::new();
    h.venue.inject_venue_error("Service Unavailable");

    let result = h.reconciler(reconciliation_config()).reconcile().await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_transient_failure_retried_through_resilient_gateway() {
    let venue = Arc::new(PaperExchange::new("paper"));
    let inner: Arc<dyn ExchangeGateway> = venue.clone();
    let config = ResilientConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
        call_timeout: Duration::from_secs(1),
        max_skew_retries: 1,
    };
    let gateway = Arc::new(ResilientGateway::new(
        inner,
        Arc::new(ClockSync::default()),
        config,
    ));
    let h = Harness::with_gateway(venue, gateway, common::engine_config());
    h.venue.inject_venue_error("connection reset by peer");

    let report = h.reconciler(reconciliation_config()).reconcile().await.unwrap();

    assert!(report.passed);
}
