//! Exchange gateway port.
//!
//! One [`ExchangeGateway`] implementation exists per venue. Adapters
//! translate venue payloads into the snapshot types in [`types`] and map
//! venue error text into [`GatewayError`] with
//! [`classify_venue_error`](crate::broker::classify_venue_error).
//! Open-order listings must include both standard and conditional orders.

mod error;
mod paper;
mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::GatewayError;
pub use paper::PaperExchange;
pub use types::{
    MarketLimits, OrderAck, OrderRequest, OrderSnapshot, Ticker, TradeFill, VenuePosition,
    volume_weighted_exit,
};

use crate::models::MarginMode;

/// Port for venue interactions.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Venue name for logs and metrics.
    fn venue(&self) -> &str;

    /// Venue clock in epoch milliseconds.
    async fn server_time(&self) -> Result<i64, GatewayError>;

    /// All open positions on the account.
    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, GatewayError>;

    /// Open orders, standard and conditional, optionally for one symbol.
    async fn fetch_open_orders(&self, symbol: Option<&str>)
    -> Result<Vec<OrderSnapshot>, GatewayError>;

    /// A single order, open or historical.
    async fn fetch_order(&self, order_id: &str, symbol: &str)
    -> Result<OrderSnapshot, GatewayError>;

    /// Account fills for `symbol` at or after `since`, oldest first.
    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, GatewayError>;

    /// Submit an order.
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Cancel one order.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), GatewayError>;

    /// Cancel every open order on a symbol.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError>;

    /// Set leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    /// Set margin mode for a symbol.
    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), GatewayError>;

    /// Last traded price.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;

    /// Trading rules for a symbol.
    async fn market_limits(&self, symbol: &str) -> Result<MarketLimits, GatewayError>;
}
