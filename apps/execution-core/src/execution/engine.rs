//! Execution engine: entries, exits, cancellations and the shared helpers
//! the fill watcher and reconciler build on.
//!
//! Locking discipline:
//!
//! - the per-symbol lock makes entry evaluation single-flight per symbol
//! - the per-position lock guards every mutation of one record, including
//!   protective order placement
//!
//! Methods suffixed `_locked` expect the caller to hold the position lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cooldown::CooldownManager;
use super::lifecycle::{LifecycleState, PositionLifecycle};
use super::locks::{KeyGuard, LockRegistry};
use super::protection::level_from_pct;
use crate::error::ExecutionError;
use crate::gateway::{
    ExchangeGateway, GatewayError, OrderAck, OrderRequest, VenuePosition, volume_weighted_exit,
};
use crate::models::{
    EntryType, ExitReason, ExitRecord, MarginMode, OrderKind, PendingOrderRef, PosKey, Position,
    PositionSide, PositionStatus, ProtectiveLeg, StrategyMetadata, TradeRecord, TradeSignal,
};
use crate::notify::{NotificationSink, TradeEvent};
use crate::observability::{record_entry, record_exit};
use crate::store::PositionBook;

// ============================================================================
// Configuration and dependencies
// ============================================================================

/// Engine settings. Fractions are expressed as decimals (`0.02` = 2%).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account name, first component of every position key.
    pub account: String,
    /// Quote notional per entry used to size signals.
    pub order_notional: Decimal,
    /// Leverage set before every entry.
    pub leverage: u32,
    /// Margin mode set before every entry.
    pub margin_mode: MarginMode,
    /// Stop distance applied when a signal carries no stop.
    pub default_stop_loss_pct: Option<Decimal>,
    /// Take-profit distance applied when a signal carries no target.
    pub default_take_profit_pct: Option<Decimal>,
    /// Signals below this confidence are ignored.
    pub min_confidence: f64,
    /// How far short of the take-profit still counts as reached when
    /// deciding to pre-empt placement.
    pub take_profit_tolerance_pct: Decimal,
    /// An exit this close to the stop counts as a loss even if PnL is not negative.
    pub loss_tolerance_pct: Decimal,
    /// Entry suppression window after a losing exit.
    pub cooldown: chrono::Duration,
    /// Fill watcher polling period.
    pub fill_poll_interval: Duration,
    /// Pending entries older than this are cancelled.
    pub pending_order_ttl: chrono::Duration,
    /// Deadline for each notification.
    pub notify_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account: "main".to_string(),
            order_notional: Decimal::from(100),
            leverage: 1,
            margin_mode: MarginMode::Isolated,
            default_stop_loss_pct: Some(Decimal::new(2, 2)),
            default_take_profit_pct: Some(Decimal::new(4, 2)),
            min_confidence: 0.0,
            take_profit_tolerance_pct: Decimal::new(1, 3),
            loss_tolerance_pct: Decimal::new(1, 3),
            cooldown: chrono::Duration::minutes(30),
            fill_poll_interval: Duration::from_secs(5),
            pending_order_ttl: chrono::Duration::hours(4),
            notify_timeout: Duration::from_secs(5),
        }
    }
}

/// Collaborators handed to the engine.
#[derive(Clone)]
pub struct EngineDeps {
    /// Venue access, normally a [`ResilientGateway`](crate::broker::ResilientGateway).
    pub gateway: Arc<dyn ExchangeGateway>,
    /// Position and cooldown state.
    pub book: Arc<PositionBook>,
    /// Operator notifications.
    pub notifier: Arc<dyn NotificationSink>,
}

/// Requests an out-of-schedule reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileTrigger(Arc<Notify>);

impl ReconcileTrigger {
    /// New trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a pass. Requests made while one is pending coalesce.
    pub fn request(&self) {
        self.0.notify_one();
    }

    /// Wait for the next request.
    pub async fn requested(&self) {
        self.0.notified().await;
    }
}

// ============================================================================
// Entry types
// ============================================================================

/// A fully sized entry.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    /// Venue symbol.
    pub symbol: String,
    /// Strategy timeframe.
    pub timeframe: String,
    /// Direction.
    pub side: PositionSide,
    /// Market or limit.
    pub entry_type: EntryType,
    /// Limit price, or reference price for a market entry.
    pub price: Decimal,
    /// Size in base units.
    pub quantity: Decimal,
    /// Stop-loss level.
    pub stop_loss: Option<Decimal>,
    /// Take-profit level.
    pub take_profit: Option<Decimal>,
    /// Strategy context.
    pub metadata: StrategyMetadata,
}

/// Why an entry was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another evaluation for the symbol holds the lock.
    InFlight,
    /// Entries disabled after a credential failure.
    ProfileDisabled,
    /// Symbol is cooling down after a loss.
    Cooldown,
    /// A live record already exists for the symbol.
    AlreadyOpen,
    /// Signal confidence below the configured minimum.
    LowConfidence,
}

impl SkipReason {
    /// Metric / log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::ProfileDisabled => "profile_disabled",
            Self::Cooldown => "cooldown",
            Self::AlreadyOpen => "already_open",
            Self::LowConfidence => "low_confidence",
        }
    }
}

/// Result of an entry attempt.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    /// Entry filled; protection attempted.
    Filled(Position),
    /// Entry order resting; fill watcher running.
    Pending(Position),
    /// Nothing sent.
    Skipped(SkipReason),
}

/// How an inactive PENDING record was resolved.
#[derive(Debug, Clone)]
pub enum PendingResolution {
    /// A venue position backs it; now FILLED.
    Promoted(Position),
    /// No fill; archived as CANCELLED.
    Cancelled(Position),
}

// ============================================================================
// Engine
// ============================================================================

/// Owns the position lifecycle for one account.
pub struct ExecutionEngine {
    pub(crate) config: EngineConfig,
    gateway: Arc<dyn ExchangeGateway>,
    book: Arc<PositionBook>,
    notifier: Arc<dyn NotificationSink>,
    cooldowns: CooldownManager,
    symbol_locks: LockRegistry<String>,
    position_locks: LockRegistry<PosKey>,
    pub(crate) watchers: Mutex<HashSet<PosKey>>,
    trigger: ReconcileTrigger,
    entries_disabled: AtomicBool,
    pub(crate) shutdown: CancellationToken,
}

impl ExecutionEngine {
    /// Build an engine. Wrap it in an `Arc` to spawn fill watchers.
    pub fn new(
        config: EngineConfig,
        deps: EngineDeps,
        trigger: ReconcileTrigger,
        shutdown: CancellationToken,
    ) -> Self {
        let cooldowns = CooldownManager::new(Arc::clone(&deps.book), config.cooldown);
        Self {
            config,
            gateway: deps.gateway,
            book: deps.book,
            notifier: deps.notifier,
            cooldowns,
            symbol_locks: LockRegistry::new(),
            position_locks: LockRegistry::new(),
            watchers: Mutex::new(HashSet::new()),
            trigger,
            entries_disabled: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Venue gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.gateway
    }

    /// Position state.
    #[must_use]
    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    /// Cooldowns.
    #[must_use]
    pub const fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    /// Trigger shared with the reconciler.
    #[must_use]
    pub const fn reconcile_trigger(&self) -> &ReconcileTrigger {
        &self.trigger
    }

    /// Key for a symbol/timeframe slot on this account.
    #[must_use]
    pub fn pos_key(&self, symbol: &str, timeframe: &str) -> PosKey {
        PosKey::new(&self.config.account, symbol, timeframe)
    }

    /// Whether new entries are allowed.
    #[must_use]
    pub fn entries_enabled(&self) -> bool {
        !self.entries_disabled.load(Ordering::Acquire)
    }

    /// Take the per-position lock.
    pub async fn lock_position(&self, key: &PosKey) -> KeyGuard {
        self.position_locks.lock(key).await
    }

    /// Whether a fill watcher runs for `key`.
    #[must_use]
    pub fn is_watching(&self, key: &PosKey) -> bool {
        self.watchers.lock().contains(key)
    }

    /// Drop idle lock slots.
    pub fn prune_locks(&self) {
        let symbols = self.symbol_locks.prune();
        let positions = self.position_locks.prune();
        if symbols + positions > 0 {
            debug!(symbols, positions, "Pruned idle locks");
        }
    }

    // ========================================================================
    // Entry
    // ========================================================================

    /// Size a strategy signal and open it.
    pub async fn evaluate_signal(
        self: &Arc<Self>,
        signal: TradeSignal,
    ) -> Result<EntryOutcome, ExecutionError> {
        if signal.confidence < self.config.min_confidence {
            return Ok(self.skipped(&signal.symbol, SkipReason::LowConfidence));
        }

        let reference = match signal.price {
            Some(price) => price,
            None => self.gateway.fetch_ticker(&signal.symbol).await?.last,
        };
        if reference <= Decimal::ZERO {
            return Err(ExecutionError::validation(
                &signal.symbol,
                format!("reference price {reference} must be positive"),
            ));
        }

        let limits = self.gateway.market_limits(&signal.symbol).await?;
        let quantity = limits.round_quantity(self.config.order_notional / reference);

        let stop_loss = signal.stop_loss.or_else(|| {
            self.config
                .default_stop_loss_pct
                .map(|pct| level_from_pct(signal.side, ProtectiveLeg::StopLoss, reference, pct))
        });
        let take_profit = signal.take_profit.or_else(|| {
            self.config
                .default_take_profit_pct
                .map(|pct| level_from_pct(signal.side, ProtectiveLeg::TakeProfit, reference, pct))
        });

        self.open_position(EntryRequest {
            symbol: signal.symbol,
            timeframe: signal.timeframe,
            side: signal.side,
            entry_type: signal.entry_type,
            price: reference,
            quantity,
            stop_loss,
            take_profit,
            metadata: StrategyMetadata {
                signals: signal.signals,
                confidence: Some(signal.confidence),
                snapshot: signal.snapshot,
            },
        })
        .await
    }

    /// Open a position.
    ///
    /// The entry intent is made durable before the order is sent; if the
    /// order fails the intent is dropped again.
    pub async fn open_position(
        self: &Arc<Self>,
        request: EntryRequest,
    ) -> Result<EntryOutcome, ExecutionError> {
        let Some(_symbol_guard) = self.symbol_locks.try_lock(&request.symbol) else {
            return Ok(self.skipped(&request.symbol, SkipReason::InFlight));
        };
        if !self.entries_enabled() {
            return Ok(self.skipped(&request.symbol, SkipReason::ProfileDisabled));
        }
        if self.cooldowns.is_active(&request.symbol).await {
            return Ok(self.skipped(&request.symbol, SkipReason::Cooldown));
        }
        if self.live_position_on(&request.symbol).is_some() {
            return Ok(self.skipped(&request.symbol, SkipReason::AlreadyOpen));
        }

        let key = self.pos_key(&request.symbol, &request.timeframe);
        let _position_guard = self.position_locks.lock(&key).await;

        validate_levels(&request)?;
        let limits = self.gateway.market_limits(&request.symbol).await;
        let limits = self.venue_call(limits).await?;
        limits
            .check(request.quantity, request.price)
            .map_err(|reason| ExecutionError::validation(&request.symbol, reason))?;

        let margin = self
            .gateway
            .set_margin_mode(&request.symbol, self.config.margin_mode)
            .await;
        self.venue_call(margin).await?;
        let leverage = self
            .gateway
            .set_leverage(&request.symbol, self.config.leverage)
            .await;
        self.venue_call(leverage).await?;

        let order = match request.entry_type {
            EntryType::Market => {
                OrderRequest::market(&request.symbol, request.side.entry_side(), request.quantity)
            }
            EntryType::Limit => OrderRequest::limit(
                &request.symbol,
                request.side.entry_side(),
                request.quantity,
                request.price,
            ),
        };

        let mut intent = Position::pending(
            key.clone(),
            &request.symbol,
            &request.timeframe,
            request.side,
            PendingOrderRef {
                order_id: None,
                client_order_id: order.client_order_id.clone(),
                price: request.price,
                quantity: request.quantity,
                order_kind: order.kind,
                placed_at: Utc::now(),
            },
        )
        .with_leverage(self.config.leverage)
        .with_metadata(request.metadata.clone());
        intent.stop_loss = request.stop_loss;
        intent.take_profit = request.take_profit;

        PositionLifecycle::validate_transition(
            key.as_str(),
            LifecycleState::None,
            LifecycleState::Pending,
        )?;
        self.book.put_durable(&intent).await?;

        let ack = match self.gateway.create_order(&order).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(pos_key = %key, error = %e, "Entry order failed, dropping intent");
                self.book.remove(&key).await;
                record_entry(&request.symbol, "failed");
                if e.is_auth() {
                    self.disable_entries(&e).await;
                }
                return Err(e.into());
            }
        };

        intent.entry_order_id = Some(ack.order_id.clone());
        if let Some(pending) = intent.pending.as_mut() {
            pending.order_id = Some(ack.order_id.clone());
        }
        intent.touch();

        let fill = if order.kind == OrderKind::Market {
            self.confirmed_fill(&ack, &request.symbol).await
        } else {
            None
        };

        let outcome = if let Some((price, quantity)) = fill {
            let filled = self.promote_locked(intent, price, quantity).await?;
            if let Err(e) = self.ensure_protection_locked(&key, None).await {
                warn!(
                    pos_key = %key,
                    error = %e,
                    "Protective placement failed after entry, reconciliation will retry"
                );
            }
            EntryOutcome::Filled(self.book.get(&key).unwrap_or(filled))
        } else {
            self.book.persist(&intent).await;
            record_entry(&request.symbol, "submitted");
            info!(
                pos_key = %key,
                order_id = %ack.order_id,
                price = %request.price,
                quantity = %request.quantity,
                "Entry order resting"
            );
            self.notify(TradeEvent::EntrySubmitted {
                key: key.clone(),
                side: request.side,
                kind: order.kind,
                price: request.price,
                quantity: request.quantity,
            })
            .await;
            self.spawn_fill_watcher(key.clone());
            EntryOutcome::Pending(intent)
        };

        self.trigger.request();
        Ok(outcome)
    }

    fn skipped(&self, symbol: &str, reason: SkipReason) -> EntryOutcome {
        debug!(symbol, reason = reason.as_str(), "Entry skipped");
        record_entry(symbol, reason.as_str());
        EntryOutcome::Skipped(reason)
    }

    /// Live record on `symbol` under any timeframe.
    fn live_position_on(&self, symbol: &str) -> Option<Position> {
        self.book
            .positions()
            .into_iter()
            .find(|p| p.symbol == symbol && p.status.is_live())
    }

    /// Fill price and quantity of an accepted order, if it has filled.
    async fn confirmed_fill(&self, ack: &OrderAck, symbol: &str) -> Option<(Decimal, Decimal)> {
        if ack.filled_quantity > Decimal::ZERO {
            if let Some(price) = ack.average_price {
                return Some((price, ack.filled_quantity));
            }
        }
        match self.gateway.fetch_order(&ack.order_id, symbol).await {
            Ok(order) if order.filled_quantity > Decimal::ZERO => order
                .average_price
                .or(order.price)
                .map(|price| (price, order.filled_quantity)),
            Ok(_) => None,
            Err(e) => {
                warn!(symbol, order_id = %ack.order_id, error = %e, "Could not confirm fill");
                None
            }
        }
    }

    /// PENDING -> FILLED at the venue-reported price and size.
    pub(crate) async fn promote_locked(
        &self,
        mut position: Position,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<Position, ExecutionError> {
        PositionLifecycle::apply(&mut position, PositionStatus::Filled)?;
        position.entry_price = price;
        position.quantity = quantity;
        self.book.persist(&position).await;

        record_entry(&position.symbol, "filled");
        info!(
            pos_key = %position.key,
            price = %price,
            quantity = %quantity,
            "Entry filled"
        );
        self.notify(TradeEvent::EntryFilled {
            key: position.key.clone(),
            side: position.side,
            price,
            quantity,
        })
        .await;
        Ok(position)
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Check a FILLED position against its stop and target at the current
    /// price, closing it on a breach. Returns the exit reason if it closed.
    pub async fn evaluate_exit(&self, key: &PosKey) -> Result<Option<ExitReason>, ExecutionError> {
        let _guard = self.position_locks.lock(key).await;
        let Some(position) = self
            .book
            .get(key)
            .filter(|p| p.status == PositionStatus::Filled)
        else {
            return Ok(None);
        };

        let last = self.gateway.fetch_ticker(&position.symbol).await?.last;
        let reason = if position.stop_breached(last) {
            ExitReason::StopLoss
        } else if position.take_profit_reached(last, Decimal::ZERO) {
            ExitReason::TakeProfit
        } else {
            return Ok(None);
        };

        info!(pos_key = %key, price = %last, reason = %reason, "Exit level reached");
        let closed = self.close_locked(position, reason).await?;
        self.trigger.request();
        Ok(closed.exit.map(|e| e.reason))
    }

    /// Force-close a FILLED position at market.
    pub async fn close_position(
        &self,
        key: &PosKey,
        reason: ExitReason,
    ) -> Result<Position, ExecutionError> {
        let _guard = self.position_locks.lock(key).await;
        let position = self
            .book
            .get(key)
            .ok_or_else(|| ExecutionError::PositionNotFound(key.to_string()))?;
        PositionLifecycle::validate_transition(
            key.as_str(),
            position.status.into(),
            LifecycleState::Closed,
        )?;
        let closed = self.close_locked(position, reason).await?;
        self.trigger.request();
        Ok(closed)
    }

    /// Close at market if the venue still holds the position, otherwise
    /// resolve it as a ghost.
    pub(crate) async fn close_locked(
        &self,
        position: Position,
        reason: ExitReason,
    ) -> Result<Position, ExecutionError> {
        match self.venue_position(&position).await? {
            Some(held) => self.market_close_locked(position, held.quantity, reason).await,
            None => {
                debug!(pos_key = %position.key, "Venue already flat, resolving from fills");
                self.resolve_ghost_locked(position).await
            }
        }
    }

    /// Reduce-only market close for `quantity`, then CLOSED. Protective
    /// orders stay in place until the venue accepts the close.
    async fn market_close_locked(
        &self,
        position: Position,
        quantity: Decimal,
        reason: ExitReason,
    ) -> Result<Position, ExecutionError> {
        let order = OrderRequest::market(&position.symbol, position.side.exit_side(), quantity)
            .reduce_only();
        let placed = self.gateway.create_order(&order).await;
        let ack = self.venue_call(placed).await?;

        let (price, filled) = match self.confirmed_fill(&ack, &position.symbol).await {
            Some(fill) => fill,
            None => {
                let last = self.gateway.fetch_ticker(&position.symbol).await?.last;
                warn!(
                    pos_key = %position.key,
                    order_id = %ack.order_id,
                    "Close fill not reported, using last price"
                );
                (last, quantity)
            }
        };

        self.cancel_protective_orders(&position).await;
        self.finalize_close(position, price, filled, reason).await
    }

    /// Resolve a FILLED record the venue no longer holds, pricing the exit
    /// from account fills since entry.
    pub(crate) async fn resolve_ghost_locked(
        &self,
        position: Position,
    ) -> Result<Position, ExecutionError> {
        let exit_side = position.side.exit_side();
        let fills: Vec<_> = self
            .gateway
            .fetch_my_trades(&position.symbol, position.opened_at)
            .await?
            .into_iter()
            .filter(|f| f.side == exit_side)
            .collect();

        let (price, quantity, reason) = match volume_weighted_exit(&fills, position.quantity) {
            Some((price, quantity)) => {
                let by = |leg: ProtectiveLeg| {
                    position
                        .protective_order_id(leg)
                        .is_some_and(|id| fills.iter().any(|f| f.order_id == id))
                };
                let reason = if by(ProtectiveLeg::StopLoss) {
                    ExitReason::StopLoss
                } else if by(ProtectiveLeg::TakeProfit) {
                    ExitReason::TakeProfit
                } else {
                    ExitReason::ExchangeSync
                };
                (price, quantity, reason)
            }
            None => {
                let last = self.gateway.fetch_ticker(&position.symbol).await?.last;
                warn!(
                    pos_key = %position.key,
                    price = %last,
                    "No exit fill found for ghost position, closing at last price"
                );
                (last, position.quantity, ExitReason::ExchangeSyncUnverified)
            }
        };

        self.cancel_protective_orders(&position).await;
        self.finalize_close(position, price, quantity, reason).await
    }

    /// FILLED -> CLOSED: archive, cooldown on loss, delete, notify.
    async fn finalize_close(
        &self,
        mut position: Position,
        price: Decimal,
        quantity: Decimal,
        reason: ExitReason,
    ) -> Result<Position, ExecutionError> {
        PositionLifecycle::apply(&mut position, PositionStatus::Closed)?;

        let pnl = position.realized_pnl(price, quantity);
        let is_loss = pnl < Decimal::ZERO
            || position.exit_near_stop(price, self.config.loss_tolerance_pct);
        let closed_at = Utc::now();
        position.exit = Some(ExitRecord {
            price,
            quantity,
            reason,
            realized_pnl: pnl,
            is_loss,
            closed_at,
        });

        self.book.archive(&TradeRecord::from(&position)).await;
        if is_loss {
            self.cooldowns.set(&position.symbol, reason.as_str()).await;
        }
        self.book.remove(&position.key).await;

        record_exit(reason.as_str(), is_loss);
        info!(
            pos_key = %position.key,
            price = %price,
            quantity = %quantity,
            pnl = %pnl,
            reason = %reason,
            is_loss,
            "Position closed"
        );
        self.notify(TradeEvent::PositionClosed {
            key: position.key.clone(),
            side: position.side,
            exit_price: price,
            pnl,
            reason,
        })
        .await;
        Ok(position)
    }

    /// Cancel recorded protective orders. Missing orders are fine.
    pub(crate) async fn cancel_protective_orders(&self, position: &Position) {
        for order_id in position.protective_order_ids() {
            match self.gateway.cancel_order(order_id, &position.symbol).await {
                Ok(()) => debug!(pos_key = %position.key, order_id, "Protective order cancelled"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(
                    pos_key = %position.key,
                    order_id,
                    error = %e,
                    "Failed to cancel protective order"
                ),
            }
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a PENDING entry. The venue cancel must succeed (or report the
    /// order missing) before the record is touched.
    pub async fn cancel_pending(&self, key: &PosKey) -> Result<PendingResolution, ExecutionError> {
        let _guard = self.position_locks.lock(key).await;
        let position = self
            .book
            .get(key)
            .ok_or_else(|| ExecutionError::PositionNotFound(key.to_string()))?;
        PositionLifecycle::validate_transition(
            key.as_str(),
            position.status.into(),
            LifecycleState::Cancelled,
        )?;
        self.cancel_pending_locked(position, "cancelled").await
    }

    pub(crate) async fn cancel_pending_locked(
        &self,
        position: Position,
        reason: &str,
    ) -> Result<PendingResolution, ExecutionError> {
        let order_id = position.pending.as_ref().and_then(|p| p.order_id.clone());

        if let Some(order_id) = order_id.as_deref() {
            match self.gateway.cancel_order(order_id, &position.symbol).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(pos_key = %position.key, order_id, "Entry order already gone");
                }
                Err(e) => {
                    warn!(
                        pos_key = %position.key,
                        order_id,
                        error = %e,
                        "Entry cancel failed, keeping record"
                    );
                    return Err(e.into());
                }
            }

            // A partial fill before the cancel leaves a position to manage.
            if let Ok(order) = self.gateway.fetch_order(order_id, &position.symbol).await {
                if order.filled_quantity > Decimal::ZERO {
                    let price = order
                        .average_price
                        .or(order.price)
                        .unwrap_or(position.entry_price);
                    let promoted = self
                        .promote_locked(position, price, order.filled_quantity)
                        .await?;
                    return Ok(PendingResolution::Promoted(promoted));
                }
            }
        }

        self.abandon_locked(position, reason)
            .await
            .map(PendingResolution::Cancelled)
    }

    /// Resolve a PENDING record whose entry order is no longer open: promote
    /// it onto an unclaimed venue position on the same symbol and side, or
    /// cancel it.
    pub(crate) async fn resolve_inactive_pending_locked(
        &self,
        position: Position,
        venue_positions: &[VenuePosition],
        claimed: &HashSet<(String, PositionSide)>,
    ) -> Result<PendingResolution, ExecutionError> {
        let backing = venue_positions.iter().find(|v| {
            v.symbol == position.symbol
                && v.side == position.side
                && !claimed.contains(&(v.symbol.clone(), v.side))
        });

        match backing {
            Some(held) => {
                info!(
                    pos_key = %position.key,
                    intended = %position.entry_price,
                    venue_entry = %held.entry_price,
                    "Promoting pending entry from venue position"
                );
                self.promote_locked(position, held.entry_price, held.quantity)
                    .await
                    .map(PendingResolution::Promoted)
            }
            None => self
                .abandon_locked(position, "entry order no longer open")
                .await
                .map(PendingResolution::Cancelled),
        }
    }

    /// PENDING -> CANCELLED without touching the venue.
    async fn abandon_locked(
        &self,
        mut position: Position,
        reason: &str,
    ) -> Result<Position, ExecutionError> {
        PositionLifecycle::apply(&mut position, PositionStatus::Cancelled)?;
        self.book.archive(&TradeRecord::from(&position)).await;
        self.book.remove(&position.key).await;

        record_entry(&position.symbol, "cancelled");
        info!(pos_key = %position.key, reason, "Pending entry cancelled");
        self.notify(TradeEvent::EntryCancelled {
            key: position.key.clone(),
            reason: reason.to_string(),
        })
        .await;
        Ok(position)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Venue position matching a record's symbol and side.
    pub(crate) async fn venue_position(
        &self,
        position: &Position,
    ) -> Result<Option<VenuePosition>, ExecutionError> {
        let held = self.gateway.fetch_positions().await?;
        Ok(held
            .into_iter()
            .find(|v| v.symbol == position.symbol && v.side == position.side))
    }

    /// Pass a venue result through, disabling entries on credential failure.
    pub(crate) async fn venue_call<T>(
        &self,
        result: Result<T, GatewayError>,
    ) -> Result<T, ExecutionError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_auth() {
                    self.disable_entries(&e).await;
                }
                Err(e.into())
            }
        }
    }

    async fn disable_entries(&self, cause: &GatewayError) {
        if self.entries_disabled.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(
            account = %self.config.account,
            error = %cause,
            "Credentials rejected, new entries disabled for this profile"
        );
        self.notify(TradeEvent::Alert {
            message: format!(
                "Entries disabled for `{}`: {cause}",
                self.config.account
            ),
        })
        .await;
    }

    /// Deliver a notification, bounded by `notify_timeout`. Never fails.
    pub(crate) async fn notify(&self, event: TradeEvent) {
        match tokio::time::timeout(self.config.notify_timeout, self.notifier.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event = event.kind(), error = %e, "Notification failed"),
            Err(_) => warn!(event = event.kind(), "Notification timed out"),
        }
    }
}

/// Stop below and target above the entry for longs, mirrored for shorts.
fn validate_levels(request: &EntryRequest) -> Result<(), ExecutionError> {
    let fail = |reason: String| Err(ExecutionError::validation(&request.symbol, reason));

    if request.quantity <= Decimal::ZERO {
        return fail(format!("quantity {} must be positive", request.quantity));
    }
    if request.price <= Decimal::ZERO {
        return fail(format!("price {} must be positive", request.price));
    }
    if let Some(stop) = request.stop_loss {
        let wrong_side = match request.side {
            PositionSide::Long => stop >= request.price,
            PositionSide::Short => stop <= request.price,
        };
        if stop <= Decimal::ZERO || wrong_side {
            return fail(format!(
                "stop-loss {stop} on wrong side of {} entry at {}",
                request.side, request.price
            ));
        }
    }
    if let Some(target) = request.take_profit {
        let wrong_side = match request.side {
            PositionSide::Long => target <= request.price,
            PositionSide::Short => target >= request.price,
        };
        if wrong_side {
            return fail(format!(
                "take-profit {target} on wrong side of {} entry at {}",
                request.side, request.price
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn request(side: PositionSide, stop: Option<Decimal>, take: Option<Decimal>) -> EntryRequest {
        EntryRequest {
            symbol: "BTCUSDT".to_string(),
            timeframe: "15m".to_string(),
            side,
            entry_type: EntryType::Market,
            price: dec!(50000),
            quantity: dec!(0.01),
            stop_loss: stop,
            take_profit: take,
            metadata: StrategyMetadata::default(),
        }
    }

    #[test_case(PositionSide::Long, Some(dec!(49000)), Some(dec!(52000)), true ; "long ok")]
    #[test_case(PositionSide::Long, Some(dec!(51000)), None, false ; "long stop above entry")]
    #[test_case(PositionSide::Long, None, Some(dec!(48000)), false ; "long target below entry")]
    #[test_case(PositionSide::Short, Some(dec!(51000)), Some(dec!(48000)), true ; "short ok")]
    #[test_case(PositionSide::Short, Some(dec!(49000)), None, false ; "short stop below entry")]
    #[test_case(PositionSide::Long, None, None, true ; "no levels")]
    fn test_validate_levels(
        side: PositionSide,
        stop: Option<Decimal>,
        take: Option<Decimal>,
        ok: bool,
    ) {
        assert_eq!(validate_levels(&request(side, stop, take)).is_ok(), ok);
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let mut req = request(PositionSide::Long, None, None);
        req.quantity = Decimal::ZERO;
        assert!(matches!(
            validate_levels(&req),
            Err(ExecutionError::Validation { .. })
        ));
    }

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::Cooldown.as_str(), "cooldown");
        assert_eq!(SkipReason::InFlight.as_str(), "in_flight");
    }
}
