//! Venue-agnostic request and snapshot types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderClass, OrderKind, OrderSide, OrderStatus, PositionSide};

/// An open position as reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePosition {
    /// Venue symbol.
    pub symbol: String,
    /// Direction.
    pub side: PositionSide,
    /// Absolute size.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Leverage in effect.
    pub leverage: u32,
    /// Unrealised PnL in quote currency.
    pub unrealized_pnl: Decimal,
}

/// An order as reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Venue order id.
    pub id: String,
    /// Client order id, when the venue echoes it.
    pub client_order_id: Option<String>,
    /// Venue symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub kind: OrderKind,
    /// Standard or conditional listing.
    pub class: OrderClass,
    /// Current status.
    pub status: OrderStatus,
    /// Requested size.
    pub quantity: Decimal,
    /// Filled size.
    pub filled_quantity: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Trigger price for conditional orders.
    pub trigger_price: Option<Decimal>,
    /// Average fill price.
    pub average_price: Option<Decimal>,
    /// Can only reduce a position.
    pub reduce_only: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl OrderSnapshot {
    /// Price level a protective order guards: trigger first, then limit.
    #[must_use]
    pub fn protective_level(&self) -> Option<Decimal> {
        self.trigger_price.or(self.price)
    }
}

/// One execution from the account's trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFill {
    /// Venue trade id.
    pub id: String,
    /// Order that produced the fill.
    pub order_id: String,
    /// Venue symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Fill price.
    pub price: Decimal,
    /// Fill size.
    pub quantity: Decimal,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Volume-weighted price of `fills`, consuming at most `max_quantity`.
///
/// Returns the price and the quantity it covers, or `None` if nothing qualifies.
#[must_use]
pub fn volume_weighted_exit(fills: &[TradeFill], max_quantity: Decimal) -> Option<(Decimal, Decimal)> {
    let mut remaining = max_quantity;
    let mut notional = Decimal::ZERO;
    let mut filled = Decimal::ZERO;

    for fill in fills {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = fill.quantity.min(remaining);
        notional += fill.price * take;
        filled += take;
        remaining -= take;
    }

    if filled.is_zero() {
        None
    } else {
        Some((notional / filled, filled))
    }
}

/// Order submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Idempotency key echoed by the venue.
    pub client_order_id: String,
    /// Venue symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub kind: OrderKind,
    /// Size.
    pub quantity: Decimal,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Trigger price.
    pub trigger_price: Option<Decimal>,
    /// Reduce-only flag.
    pub reduce_only: bool,
}

impl OrderRequest {
    fn base(symbol: &str, side: OrderSide, kind: OrderKind, quantity: Decimal) -> Self {
        Self {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            kind,
            quantity,
            price: None,
            trigger_price: None,
            reduce_only: false,
        }
    }

    /// Create a market order request.
    #[must_use]
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::base(symbol, side, OrderKind::Market, quantity)
    }

    /// Create a limit order request.
    #[must_use]
    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            ..Self::base(symbol, side, OrderKind::Limit, quantity)
        }
    }

    /// Reduce-only stop market order.
    #[must_use]
    pub fn stop_market(symbol: &str, side: OrderSide, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            trigger_price: Some(trigger),
            reduce_only: true,
            ..Self::base(symbol, side, OrderKind::StopMarket, quantity)
        }
    }

    /// Reduce-only take-profit market order.
    #[must_use]
    pub fn take_profit_market(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        trigger: Decimal,
    ) -> Self {
        Self {
            trigger_price: Some(trigger),
            reduce_only: true,
            ..Self::base(symbol, side, OrderKind::TakeProfitMarket, quantity)
        }
    }

    /// Mark as reduce-only.
    #[must_use]
    pub const fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Use a caller-chosen client order id.
    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = id.into();
        self
    }
}

/// Acknowledgment from the venue after order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Venue order id.
    pub order_id: String,
    /// Client order id echoed back.
    pub client_order_id: String,
    /// Status at acknowledgment.
    pub status: OrderStatus,
    /// Filled quantity (market orders usually fill on ack).
    pub filled_quantity: Decimal,
    /// Average fill price.
    pub average_price: Option<Decimal>,
}

/// Last traded price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Venue symbol.
    pub symbol: String,
    /// Last price.
    pub last: Decimal,
    /// Quote time.
    pub timestamp: DateTime<Utc>,
}

/// Venue trading rules for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLimits {
    /// Minimum order size.
    pub min_quantity: Decimal,
    /// Minimum order notional in quote currency.
    pub min_notional: Decimal,
    /// Size increment.
    pub quantity_step: Decimal,
}

impl MarketLimits {
    /// Round `quantity` down to the size increment.
    #[must_use]
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.quantity_step <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.quantity_step).floor() * self.quantity_step
    }

    /// Check an order against the minimums.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn check(&self, quantity: Decimal, price: Decimal) -> Result<(), String> {
        if quantity <= Decimal::ZERO {
            return Err(format!("quantity {quantity} must be positive"));
        }
        if quantity < self.min_quantity {
            return Err(format!(
                "quantity {quantity} below minimum {}",
                self.min_quantity
            ));
        }
        let notional = quantity * price;
        if notional < self.min_notional {
            return Err(format!(
                "notional {notional} below minimum {}",
                self.min_notional
            ));
        }
        Ok(())
    }
}
