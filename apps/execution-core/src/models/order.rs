//! Order-related enums shared by the gateway and the lifecycle engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened with this side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type as understood by perpetual futures venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Execute at best available price.
    Market,
    /// Rest on the book at a fixed price.
    Limit,
    /// Market order released when the trigger price is crossed against the position.
    StopMarket,
    /// Market order released when the trigger price is crossed in favour of the position.
    TakeProfitMarket,
    /// Limit order released at the stop trigger.
    StopLimit,
    /// Limit order released at the take-profit trigger.
    TakeProfitLimit,
}

impl OrderKind {
    /// Stop-loss family (stop market or stop limit).
    #[must_use]
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::StopMarket | Self::StopLimit)
    }

    /// Take-profit family.
    #[must_use]
    pub const fn is_take_profit(self) -> bool {
        matches!(self, Self::TakeProfitMarket | Self::TakeProfitLimit)
    }

    /// Orders that rest off-book until a trigger price is hit.
    #[must_use]
    pub const fn is_conditional(self) -> bool {
        self.is_stop() || self.is_take_profit()
    }

    /// Class the venue files this order kind under.
    #[must_use]
    pub const fn class(self) -> OrderClass {
        if self.is_conditional() {
            OrderClass::Conditional
        } else {
            OrderClass::Standard
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            Self::StopLimit => "STOP_LIMIT",
            Self::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        };
        write!(f, "{s}")
    }
}

/// Venues list regular and trigger orders through different endpoints.
/// Open-order snapshots carry the class so both are visible to reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderClass {
    /// Regular book orders.
    Standard,
    /// Trigger / algo orders (stops, take-profits).
    Conditional,
}

/// Venue-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Working on the venue.
    Open,
    /// Partially filled, remainder still working.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled by us or the venue.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
    /// Expired (time in force or trigger expiry).
    Expired,
}

impl OrderStatus {
    /// Still working on the venue.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }

    /// Ended without a complete fill.
    #[must_use]
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::Expired)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// Margin mode for a perpetual contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginMode {
    /// Margin isolated per position.
    #[default]
    Isolated,
    /// Margin shared across the account.
    Cross,
}

/// Which protective leg an order represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveLeg {
    /// Stop-loss leg.
    StopLoss,
    /// Take-profit leg.
    TakeProfit,
}

impl ProtectiveLeg {
    /// Both legs, stop-loss first.
    pub const ALL: [Self; 2] = [Self::StopLoss, Self::TakeProfit];

    /// Whether an order kind can serve as this leg.
    #[must_use]
    pub const fn accepts(self, kind: OrderKind) -> bool {
        match self {
            Self::StopLoss => kind.is_stop(),
            Self::TakeProfit => kind.is_take_profit(),
        }
    }

    /// Metric / log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
        }
    }
}

impl fmt::Display for ProtectiveLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_kind_classes() {
        assert_eq!(OrderKind::Market.class(), OrderClass::Standard);
        assert_eq!(OrderKind::Limit.class(), OrderClass::Standard);
        assert_eq!(OrderKind::StopMarket.class(), OrderClass::Conditional);
        assert_eq!(OrderKind::TakeProfitLimit.class(), OrderClass::Conditional);
    }

    #[test]
    fn test_leg_accepts_kind() {
        assert!(ProtectiveLeg::StopLoss.accepts(OrderKind::StopMarket));
        assert!(ProtectiveLeg::StopLoss.accepts(OrderKind::StopLimit));
        assert!(!ProtectiveLeg::StopLoss.accepts(OrderKind::TakeProfitMarket));
        assert!(ProtectiveLeg::TakeProfit.accepts(OrderKind::TakeProfitMarket));
        assert!(!ProtectiveLeg::TakeProfit.accepts(OrderKind::Limit));
    }

    #[test]
    fn test_status_open_and_dead() {
        assert!(OrderStatus::Open.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(!OrderStatus::Filled.is_open());
        assert!(OrderStatus::Expired.is_dead());
        assert!(!OrderStatus::Filled.is_dead());
    }
}
