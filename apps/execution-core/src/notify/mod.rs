//! Outbound trade notifications.
//!
//! Sinks are best effort: the engine bounds every call with a timeout and
//! only logs failures.

mod telegram;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

pub use telegram::TelegramNotifier;

use crate::models::{ExitReason, OrderKind, PosKey, PositionSide, ProtectiveLeg};

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sink answered with a non-success status.
    #[error("sink returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Something worth telling the operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeEvent {
    /// Entry order accepted by the venue and resting.
    EntrySubmitted {
        /// Position key.
        key: PosKey,
        /// Direction.
        side: PositionSide,
        /// Entry order type.
        kind: OrderKind,
        /// Target price.
        price: Decimal,
        /// Quantity.
        quantity: Decimal,
    },
    /// Entry filled.
    EntryFilled {
        /// Position key.
        key: PosKey,
        /// Direction.
        side: PositionSide,
        /// Fill price.
        price: Decimal,
        /// Filled quantity.
        quantity: Decimal,
    },
    /// Protective order resting on the venue.
    ProtectionPlaced {
        /// Position key.
        key: PosKey,
        /// Which leg.
        leg: ProtectiveLeg,
        /// Trigger level.
        level: Decimal,
        /// Order quantity.
        quantity: Decimal,
        /// Venue order id.
        order_id: String,
    },
    /// Position closed.
    PositionClosed {
        /// Position key.
        key: PosKey,
        /// Direction.
        side: PositionSide,
        /// Exit price.
        exit_price: Decimal,
        /// Realised PnL.
        pnl: Decimal,
        /// Why.
        reason: ExitReason,
    },
    /// Pending entry abandoned.
    EntryCancelled {
        /// Position key.
        key: PosKey,
        /// Why.
        reason: String,
    },
    /// Unknown venue position taken under management.
    OrphanAdopted {
        /// New position key.
        key: PosKey,
        /// Direction.
        side: PositionSide,
        /// Venue quantity.
        quantity: Decimal,
        /// Venue entry price.
        entry_price: Decimal,
    },
    /// Free-form operator alert.
    Alert {
        /// Message text.
        message: String,
    },
}

impl TradeEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EntrySubmitted { .. } => "entry_submitted",
            Self::EntryFilled { .. } => "entry_filled",
            Self::ProtectionPlaced { .. } => "protection_placed",
            Self::PositionClosed { .. } => "position_closed",
            Self::EntryCancelled { .. } => "entry_cancelled",
            Self::OrphanAdopted { .. } => "orphan_adopted",
            Self::Alert { .. } => "alert",
        }
    }

    /// Markdown message body.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::EntrySubmitted {
                key,
                side,
                kind,
                price,
                quantity,
            } => format!("*Entry Submitted*\n`{key}`\n{side} {kind} {quantity} @ {price}"),
            Self::EntryFilled {
                key,
                side,
                price,
                quantity,
            } => format!("*Entry Filled*\n`{key}`\n{side} {quantity} @ {price}"),
            Self::ProtectionPlaced {
                key,
                leg,
                level,
                quantity,
                order_id,
            } => {
                let title = match leg {
                    ProtectiveLeg::StopLoss => "Stop-Loss",
                    ProtectiveLeg::TakeProfit => "Take-Profit",
                };
                format!("*{title} Placed*\n`{key}`\n{quantity} @ {level}\nOrder: `{order_id}`")
            }
            Self::PositionClosed {
                key,
                side,
                exit_price,
                pnl,
                reason,
            } => {
                let title = if *pnl < Decimal::ZERO {
                    "Position Closed (loss)"
                } else {
                    "Position Closed"
                };
                format!(
                    "*{title}*\n`{key}`\n{side} exit @ {exit_price}\nPnL: {}\nReason: {reason}",
                    pnl.round_dp(2)
                )
            }
            Self::EntryCancelled { key, reason } => {
                format!("*Entry Cancelled*\n`{key}`\nReason: {reason}")
            }
            Self::OrphanAdopted {
                key,
                side,
                quantity,
                entry_price,
            } => format!("*Orphan Adopted*\n`{key}`\n{side} {quantity} @ {entry_price}"),
            Self::Alert { message } => format!("*Alert*\n{message}"),
        }
    }
}

/// Delivery port for [`TradeEvent`]s.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: &TradeEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log. Used when no remote sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &TradeEvent) -> Result<(), NotifyError> {
        info!(event = event.kind(), message = %event.render(), "Trade event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_render_loss_close() {
        let event = TradeEvent::PositionClosed {
            key: PosKey::new("main", "BTCUSDT", "15m"),
            side: PositionSide::Long,
            exit_price: dec!(48950),
            pnl: dec!(-1050),
            reason: ExitReason::ExchangeSync,
        };
        let text = event.render();
        assert!(text.starts_with("*Position Closed (loss)*"));
        assert!(text.contains("main_BTCUSDT_15m"));
        assert!(text.contains("exchange_sync"));
    }

    #[test]
    fn test_render_protection() {
        let event = TradeEvent::ProtectionPlaced {
            key: PosKey::new("main", "ETHUSDT", "1h"),
            leg: ProtectiveLeg::StopLoss,
            level: dec!(2900),
            quantity: dec!(1.5),
            order_id: "sl-1".to_string(),
        };
        assert_eq!(event.kind(), "protection_placed");
        assert!(event.render().contains("1.5 @ 2900"));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let event = TradeEvent::Alert {
            message: "profile disabled".to_string(),
        };
        assert!(LogNotifier.notify(&event).await.is_ok());
    }
}
