//! Locally tracked positions and their archived trade records.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderKind, OrderSide, ProtectiveLeg};

// ============================================================================
// Identity
// ============================================================================

/// Position key: `{account}_{symbol}_{timeframe}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PosKey(String);

impl PosKey {
    /// Build the key for an account, symbol and timeframe.
    #[must_use]
    pub fn new(account: &str, symbol: &str, timeframe: &str) -> Self {
        Self(format!("{account}_{symbol}_{timeframe}"))
    }

    /// Borrow the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PosKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    /// Long exposure.
    Long,
    /// Short exposure.
    Short,
}

impl PositionSide {
    /// Order side that opens this position.
    #[must_use]
    pub const fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes this position.
    #[must_use]
    pub const fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Local lifecycle status of a position record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Entry intent persisted or entry order resting.
    Pending,
    /// Entry filled, position open.
    Filled,
    /// Position exited.
    Closed,
    /// Entry abandoned before any fill.
    Cancelled,
}

impl PositionStatus {
    /// PENDING or FILLED.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Filled)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Filled => "FILLED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Stop-loss level reached.
    StopLoss,
    /// Take-profit level reached.
    TakeProfit,
    /// Stop already breached when protection was being placed.
    UrgentStopLoss,
    /// Take-profit already reached when protection was being placed.
    UrgentTakeProfit,
    /// Venue closed the position; exit price taken from venue fills.
    ExchangeSync,
    /// Venue closed the position; no matching fill was found.
    ExchangeSyncUnverified,
    /// Operator or caller forced the close.
    Manual,
}

impl ExitReason {
    /// Metric / log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::UrgentStopLoss => "urgent_stop_loss",
            Self::UrgentTakeProfit => "urgent_take_profit",
            Self::ExchangeSync => "exchange_sync",
            Self::ExchangeSyncUnverified => "exchange_sync_unverified",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// The entry order backing a PENDING record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrderRef {
    /// Venue order id; `None` until the venue acknowledges the order.
    pub order_id: Option<String>,
    /// Client order id sent with the entry.
    pub client_order_id: String,
    /// Target price.
    pub price: Decimal,
    /// Intended quantity.
    pub quantity: Decimal,
    /// Entry order type.
    pub order_kind: OrderKind,
    /// When the intent was recorded.
    pub placed_at: DateTime<Utc>,
}

/// Strategy context captured at entry. Preserved verbatim through every merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    /// Signal names that triggered the entry.
    #[serde(default)]
    pub signals: Vec<String>,
    /// Signal confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Free-form indicator snapshot.
    #[serde(default)]
    pub snapshot: serde_json::Value,
}

/// Exit details, set when the record transitions to CLOSED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    /// Realised exit price.
    pub price: Decimal,
    /// Quantity closed.
    pub quantity: Decimal,
    /// Why the position closed.
    pub reason: ExitReason,
    /// Realised PnL in quote currency.
    pub realized_pnl: Decimal,
    /// Whether the exit counts as a loss for cooldown purposes.
    pub is_loss: bool,
    /// Close timestamp.
    pub closed_at: DateTime<Utc>,
}

/// A locally tracked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// `{account}_{symbol}_{timeframe}`.
    pub key: PosKey,
    /// Venue symbol.
    pub symbol: String,
    /// Strategy timeframe.
    pub timeframe: String,
    /// Direction.
    pub side: PositionSide,
    /// Position size in base units.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Venue id of the entry order.
    pub entry_order_id: Option<String>,
    /// Stop-loss price level.
    pub stop_loss: Option<Decimal>,
    /// Take-profit price level.
    pub take_profit: Option<Decimal>,
    /// Venue id of the resting stop-loss order.
    pub stop_loss_order_id: Option<String>,
    /// Venue id of the resting take-profit order.
    pub take_profit_order_id: Option<String>,
    /// Leverage applied on the venue.
    pub leverage: u32,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// Entry time.
    pub opened_at: DateTime<Utc>,
    /// Last local mutation.
    pub updated_at: DateTime<Utc>,
    /// Entry order, only while PENDING.
    #[serde(default)]
    pub pending: Option<PendingOrderRef>,
    /// Strategy context.
    #[serde(default)]
    pub metadata: StrategyMetadata,
    /// Created by reconciliation from an unknown venue position.
    #[serde(default)]
    pub adopted: bool,
    /// Exit details once CLOSED.
    #[serde(default)]
    pub exit: Option<ExitRecord>,
}

impl Position {
    /// A FILLED record with no protection attached yet.
    #[must_use]
    pub fn filled(
        key: PosKey,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            side,
            quantity,
            entry_price,
            entry_order_id: None,
            stop_loss: None,
            take_profit: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
            leverage: 1,
            status: PositionStatus::Filled,
            opened_at: now,
            updated_at: now,
            pending: None,
            metadata: StrategyMetadata::default(),
            adopted: false,
            exit: None,
        }
    }

    /// A PENDING record backed by an entry order.
    #[must_use]
    pub fn pending(
        key: PosKey,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
        side: PositionSide,
        order: PendingOrderRef,
    ) -> Self {
        let mut position = Self::filled(key, symbol, timeframe, side, order.quantity, order.price);
        position.status = PositionStatus::Pending;
        position.opened_at = order.placed_at;
        position.entry_order_id.clone_from(&order.order_id);
        position.pending = Some(order);
        position
    }

    /// Set the stop-loss level.
    #[must_use]
    pub const fn with_stop_loss(mut self, level: Decimal) -> Self {
        self.stop_loss = Some(level);
        self
    }

    /// Set the take-profit level.
    #[must_use]
    pub const fn with_take_profit(mut self, level: Decimal) -> Self {
        self.take_profit = Some(level);
        self
    }

    /// Set the leverage.
    #[must_use]
    pub const fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    /// Override the entry time.
    #[must_use]
    pub const fn with_opened_at(mut self, opened_at: DateTime<Utc>) -> Self {
        self.opened_at = opened_at;
        self
    }

    /// Attach strategy metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: StrategyMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Level configured for a protective leg.
    #[must_use]
    pub const fn level(&self, leg: ProtectiveLeg) -> Option<Decimal> {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss,
            ProtectiveLeg::TakeProfit => self.take_profit,
        }
    }

    /// Recorded venue order id for a protective leg.
    #[must_use]
    pub fn protective_order_id(&self, leg: ProtectiveLeg) -> Option<&str> {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss_order_id.as_deref(),
            ProtectiveLeg::TakeProfit => self.take_profit_order_id.as_deref(),
        }
    }

    /// Record or clear the venue order id for a protective leg.
    pub fn set_protective_order_id(&mut self, leg: ProtectiveLeg, order_id: Option<String>) {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss_order_id = order_id,
            ProtectiveLeg::TakeProfit => self.take_profit_order_id = order_id,
        }
    }

    /// Set the level for a protective leg.
    pub const fn set_level(&mut self, leg: ProtectiveLeg, level: Decimal) {
        match leg {
            ProtectiveLeg::StopLoss => self.stop_loss = Some(level),
            ProtectiveLeg::TakeProfit => self.take_profit = Some(level),
        }
    }

    /// Legs that have a level but no resting order.
    #[must_use]
    pub fn missing_protection(&self) -> Vec<ProtectiveLeg> {
        ProtectiveLeg::ALL
            .into_iter()
            .filter(|leg| self.level(*leg).is_some() && self.protective_order_id(*leg).is_none())
            .collect()
    }

    /// All recorded protective order ids.
    pub fn protective_order_ids(&self) -> impl Iterator<Item = &str> {
        self.stop_loss_order_id
            .as_deref()
            .into_iter()
            .chain(self.take_profit_order_id.as_deref())
    }

    /// Whether `price` is at or through the stop.
    #[must_use]
    pub fn stop_breached(&self, price: Decimal) -> bool {
        self.stop_loss.is_some_and(|stop| match self.side {
            PositionSide::Long => price <= stop,
            PositionSide::Short => price >= stop,
        })
    }

    /// Whether `price` has reached the take-profit, allowing `tolerance`
    /// (a fraction of the level) short of it.
    #[must_use]
    pub fn take_profit_reached(&self, price: Decimal, tolerance: Decimal) -> bool {
        self.take_profit.is_some_and(|target| match self.side {
            PositionSide::Long => price >= target * (Decimal::ONE - tolerance),
            PositionSide::Short => price <= target * (Decimal::ONE + tolerance),
        })
    }

    /// PnL of closing `quantity` at `exit_price`.
    #[must_use]
    pub fn realized_pnl(&self, exit_price: Decimal, quantity: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (exit_price - self.entry_price) * quantity,
            PositionSide::Short => (self.entry_price - exit_price) * quantity,
        }
    }

    /// Whether `exit_price` lies within `tolerance` (fraction of the stop) of the stop level.
    #[must_use]
    pub fn exit_near_stop(&self, exit_price: Decimal, tolerance: Decimal) -> bool {
        self.stop_loss
            .is_some_and(|stop| (exit_price - stop).abs() <= stop * tolerance)
    }

    /// Mark a local mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One line of the append-only trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Position key.
    pub key: PosKey,
    /// Venue symbol.
    pub symbol: String,
    /// Strategy timeframe.
    pub timeframe: String,
    /// Direction.
    pub side: PositionSide,
    /// Terminal status (CLOSED or CANCELLED).
    pub status: PositionStatus,
    /// Position size.
    pub quantity: Decimal,
    /// Entry price.
    pub entry_price: Decimal,
    /// Exit price, CLOSED only.
    pub exit_price: Option<Decimal>,
    /// Realised PnL, CLOSED only.
    pub realized_pnl: Option<Decimal>,
    /// Exit reason, CLOSED only.
    pub reason: Option<ExitReason>,
    /// Loss flag used for cooldowns.
    pub is_loss: bool,
    /// Entry time.
    pub opened_at: DateTime<Utc>,
    /// Archive time.
    pub closed_at: DateTime<Utc>,
    /// Adopted from the venue.
    pub adopted: bool,
    /// Strategy context.
    pub metadata: StrategyMetadata,
}

impl From<&Position> for TradeRecord {
    fn from(position: &Position) -> Self {
        let exit = position.exit.as_ref();
        Self {
            key: position.key.clone(),
            symbol: position.symbol.clone(),
            timeframe: position.timeframe.clone(),
            side: position.side,
            status: position.status,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: exit.map(|e| e.price),
            realized_pnl: exit.map(|e| e.realized_pnl),
            reason: exit.map(|e| e.reason),
            is_loss: exit.is_some_and(|e| e.is_loss),
            opened_at: position.opened_at,
            closed_at: exit.map_or_else(Utc::now, |e| e.closed_at),
            adopted: position.adopted,
            metadata: position.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_btc() -> Position {
        Position::filled(
            PosKey::new("main", "BTCUSDT", "15m"),
            "BTCUSDT",
            "15m",
            PositionSide::Long,
            dec!(0.01),
            dec!(50000),
        )
        .with_stop_loss(dec!(49000))
        .with_take_profit(dec!(52000))
    }

    #[test]
    fn test_pos_key_format() {
        let key = PosKey::new("main", "BTCUSDT", "15m");
        assert_eq!(key.as_str(), "main_BTCUSDT_15m");
        assert_eq!(key.to_string(), "main_BTCUSDT_15m");
    }

    #[test]
    fn test_position_sides() {
        assert_eq!(PositionSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.exit_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_side(), OrderSide::Buy);
    }

    #[test]
    fn test_stop_breached_long_and_short() {
        let long = long_btc();
        assert!(long.stop_breached(dec!(49000)));
        assert!(long.stop_breached(dec!(48000)));
        assert!(!long.stop_breached(dec!(49001)));

        let mut short = long_btc();
        short.side = PositionSide::Short;
        short.stop_loss = Some(dec!(51000));
        assert!(short.stop_breached(dec!(51000)));
        assert!(!short.stop_breached(dec!(50999)));
    }

    #[test]
    fn test_take_profit_tolerance() {
        let long = long_btc();
        assert!(!long.take_profit_reached(dec!(51900), Decimal::ZERO));
        // 0.5% of 52000 = 260, so 51740 qualifies
        assert!(long.take_profit_reached(dec!(51900), dec!(0.005)));
        assert!(!long.take_profit_reached(dec!(51700), dec!(0.005)));
    }

    #[test]
    fn test_realized_pnl() {
        let long = long_btc();
        assert_eq!(long.realized_pnl(dec!(48950), dec!(0.01)), dec!(-10.50));

        let mut short = long_btc();
        short.side = PositionSide::Short;
        assert_eq!(short.realized_pnl(dec!(48950), dec!(0.01)), dec!(10.50));
    }

    #[test]
    fn test_missing_protection() {
        let mut position = long_btc();
        assert_eq!(
            position.missing_protection(),
            vec![ProtectiveLeg::StopLoss, ProtectiveLeg::TakeProfit]
        );

        position.set_protective_order_id(ProtectiveLeg::StopLoss, Some("sl-1".to_string()));
        assert_eq!(position.missing_protection(), vec![ProtectiveLeg::TakeProfit]);

        position.take_profit = None;
        assert!(position.missing_protection().is_empty());
    }

    #[test]
    fn test_exit_near_stop() {
        let position = long_btc();
        assert!(position.exit_near_stop(dec!(49010), dec!(0.001)));
        assert!(!position.exit_near_stop(dec!(49100), dec!(0.001)));
    }

    #[test]
    fn test_metadata_survives_serde() {
        let position = long_btc().with_metadata(StrategyMetadata {
            signals: vec!["ema_cross".to_string()],
            confidence: Some(0.8),
            snapshot: serde_json::json!({"rsi": 31.5}),
        });
        let json = serde_json::to_string(&position).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata, position.metadata);
    }
}
