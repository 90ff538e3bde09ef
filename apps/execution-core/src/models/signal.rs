//! Strategy signals consumed by the scheduler.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::PositionSide;

/// How the entry should be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Fill immediately.
    Market,
    /// Rest at `TradeSignal::price`.
    Limit,
}

/// An entry decision produced by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Venue symbol.
    pub symbol: String,
    /// Strategy timeframe.
    pub timeframe: String,
    /// Direction.
    pub side: PositionSide,
    /// Entry order type.
    pub entry_type: EntryType,
    /// Limit price, or reference price for market entries. Ticker is used when absent.
    pub price: Option<Decimal>,
    /// Stop-loss level; configured default applies when absent.
    pub stop_loss: Option<Decimal>,
    /// Take-profit level; configured default applies when absent.
    pub take_profit: Option<Decimal>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Signal names.
    pub signals: Vec<String>,
    /// Indicator snapshot.
    pub snapshot: serde_json::Value,
}

/// Signal source errors.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Market data unavailable.
    #[error("market data unavailable: {0}")]
    Data(String),

    /// Strategy evaluation failed.
    #[error("strategy error: {0}")]
    Strategy(String),
}

/// Produces entry signals for a symbol/timeframe pair.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Evaluate the strategy. `Ok(None)` means no entry.
    async fn evaluate(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<TradeSignal>, SignalError>;
}

/// Never signals. Used when the process only manages existing positions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

#[async_trait]
impl SignalSource for NoSignals {
    async fn evaluate(
        &self,
        _symbol: &str,
        _timeframe: &str,
    ) -> Result<Option<TradeSignal>, SignalError> {
        Ok(None)
    }
}
