//! In-memory simulated venue.
//!
//! Used by the binary's PAPER mode and by tests. Market orders fill at the
//! last price, limit and trigger orders rest until [`PaperExchange::set_price`]
//! crosses them. Positions are netted per symbol (one-way mode).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{
    ExchangeGateway, GatewayError, MarketLimits, OrderAck, OrderRequest, OrderSnapshot, Ticker,
    TradeFill, VenuePosition,
};
use crate::broker::classify_venue_error;
use crate::models::{MarginMode, OrderKind, OrderSide, OrderStatus, PositionSide};

const DEFAULT_LIMITS: MarketLimits = MarketLimits {
    min_quantity: dec!(0.001),
    min_notional: dec!(5),
    quantity_step: dec!(0.001),
};

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, Decimal>,
    positions: HashMap<String, VenuePosition>,
    orders: Vec<OrderSnapshot>,
    trades: Vec<TradeFill>,
    limits: HashMap<String, MarketLimits>,
    leverage: HashMap<String, u32>,
    margin: HashMap<String, MarginMode>,
    failures: VecDeque<GatewayError>,
    created_orders: usize,
    sequence: u64,
    clock_offset_ms: i64,
}

impl PaperState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}-{}", self.sequence)
    }

    /// Size an order on `side` may reduce.
    fn reducible(&self, symbol: &str, side: OrderSide) -> Decimal {
        self.positions
            .get(symbol)
            .filter(|p| p.side.exit_side() == side)
            .map_or(Decimal::ZERO, |p| p.quantity)
    }

    fn execute(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal, order_id: &str) {
        let trade_id = self.next_id("trade");
        self.trades.push(TradeFill {
            id: trade_id,
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            timestamp: Utc::now(),
        });
        self.apply_fill(symbol, side, quantity, price);
    }

    fn apply_fill(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) {
        let leverage = self.leverage.get(symbol).copied().unwrap_or(1);
        let fill_side = match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };

        let Some(position) = self.positions.get_mut(symbol) else {
            self.positions.insert(
                symbol.to_string(),
                VenuePosition {
                    symbol: symbol.to_string(),
                    side: fill_side,
                    quantity,
                    entry_price: price,
                    leverage,
                    unrealized_pnl: Decimal::ZERO,
                },
            );
            return;
        };

        if position.side == fill_side {
            let total = position.quantity + quantity;
            position.entry_price = (position.entry_price * position.quantity + price * quantity) / total;
            position.quantity = total;
        } else if quantity < position.quantity {
            position.quantity -= quantity;
        } else if quantity == position.quantity {
            self.positions.remove(symbol);
        } else {
            let remainder = quantity - position.quantity;
            *position = VenuePosition {
                symbol: symbol.to_string(),
                side: fill_side,
                quantity: remainder,
                entry_price: price,
                leverage,
                unrealized_pnl: Decimal::ZERO,
            };
        }
    }

    fn fill_resting(&mut self, index: usize, price: Decimal) {
        let (symbol, side, mut quantity, reduce_only, id) = {
            let order = &self.orders[index];
            (
                order.symbol.clone(),
                order.side,
                order.quantity - order.filled_quantity,
                order.reduce_only,
                order.id.clone(),
            )
        };

        if reduce_only {
            let held = self.reducible(&symbol, side);
            if held.is_zero() {
                self.orders[index].status = OrderStatus::Expired;
                return;
            }
            quantity = quantity.min(held);
        }

        self.execute(&symbol, side, quantity, price, &id);
        let order = &mut self.orders[index];
        order.filled_quantity += quantity;
        order.average_price = Some(price);
        order.status = OrderStatus::Filled;
    }

    fn take_failure(&mut self) -> Result<(), GatewayError> {
        self.failures.pop_front().map_or(Ok(()), Err)
    }

    fn refresh_pnl(&mut self, symbol: &str) {
        let Some(price) = self.prices.get(symbol).copied() else {
            return;
        };
        if let Some(position) = self.positions.get_mut(symbol) {
            position.unrealized_pnl = match position.side {
                PositionSide::Long => (price - position.entry_price) * position.quantity,
                PositionSide::Short => (position.entry_price - price) * position.quantity,
            };
        }
    }
}

fn ack_of(order: &OrderSnapshot) -> OrderAck {
    OrderAck {
        order_id: order.id.clone(),
        client_order_id: order.client_order_id.clone().unwrap_or_default(),
        status: order.status,
        filled_quantity: order.filled_quantity,
        average_price: order.average_price,
    }
}

/// Whether `price` crosses a resting order.
fn crosses(order: &OrderSnapshot, price: Decimal) -> bool {
    let level = match order.kind {
        OrderKind::Market => return true,
        OrderKind::Limit => order.price,
        _ => order.trigger_price,
    };
    let Some(level) = level else {
        return false;
    };
    match (order.kind, order.side) {
        (OrderKind::Limit | OrderKind::TakeProfitMarket | OrderKind::TakeProfitLimit, OrderSide::Buy)
        | (OrderKind::StopMarket | OrderKind::StopLimit, OrderSide::Sell) => price <= level,
        _ => price >= level,
    }
}

/// Simulated venue holding positions, orders and fills in memory.
#[derive(Debug)]
pub struct PaperExchange {
    name: String,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    /// Create an empty venue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PaperState::default()),
        }
    }

    /// Set the last price and fire any resting orders it crosses.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock();
        state.prices.insert(symbol.to_string(), price);

        let crossed: Vec<usize> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.symbol == symbol && o.status.is_open() && crosses(o, price))
            .map(|(i, _)| i)
            .collect();

        for index in crossed {
            let exec_price = match state.orders[index].kind {
                OrderKind::Limit | OrderKind::StopLimit | OrderKind::TakeProfitLimit => {
                    state.orders[index].price.unwrap_or(price)
                }
                _ => price,
            };
            state.fill_resting(index, exec_price);
        }
        state.refresh_pnl(symbol);
    }

    /// Override trading rules for a symbol.
    pub fn set_limits(&self, symbol: &str, limits: MarketLimits) {
        self.state.lock().limits.insert(symbol.to_string(), limits);
    }

    /// Place a position directly, bypassing orders.
    pub fn insert_position(&self, position: VenuePosition) {
        self.state
            .lock()
            .positions
            .insert(position.symbol.clone(), position);
    }

    /// Remove a position directly (liquidation, manual close elsewhere).
    pub fn remove_position(&self, symbol: &str) {
        self.state.lock().positions.remove(symbol);
    }

    /// Current position on a symbol.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<VenuePosition> {
        self.state.lock().positions.get(symbol).cloned()
    }

    /// Place an order snapshot directly, bypassing validation.
    pub fn insert_order(&self, order: OrderSnapshot) {
        self.state.lock().orders.push(order);
    }

    /// Append a fill to the trade history without touching positions.
    pub fn insert_trade(&self, fill: TradeFill) {
        self.state.lock().trades.push(fill);
    }

    /// Fill a resting order at `price`. Returns `false` if it is not open.
    pub fn fill_order(&self, order_id: &str, price: Decimal) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state
            .orders
            .iter()
            .position(|o| o.id == order_id && o.status.is_open())
        else {
            return false;
        };
        state.fill_resting(index, price);
        true
    }

    /// Force an order's status (venue-side cancel, rejection, expiry).
    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.iter_mut().find(|o| o.id == order_id) {
            order.status = status;
        }
    }

    /// Forget an order entirely, so lookups return not-found.
    pub fn forget_order(&self, order_id: &str) {
        self.state.lock().orders.retain(|o| o.id != order_id);
    }

    /// Queue an error returned by the next gateway call.
    pub fn inject_failure(&self, error: GatewayError) {
        self.state.lock().failures.push_back(error);
    }

    /// Queue a failure described by raw venue error text.
    pub fn inject_venue_error(&self, message: &str) {
        self.inject_failure(classify_venue_error(message));
    }

    /// Number of orders accepted through [`ExchangeGateway::create_order`].
    #[must_use]
    pub fn created_order_count(&self) -> usize {
        self.state.lock().created_orders
    }

    /// Open orders on a symbol.
    #[must_use]
    pub fn open_orders_for(&self, symbol: &str) -> Vec<OrderSnapshot> {
        self.state
            .lock()
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.status.is_open())
            .cloned()
            .collect()
    }

    /// Shift the simulated venue clock.
    pub fn set_clock_offset_ms(&self, offset_ms: i64) {
        self.state.lock().clock_offset_ms = offset_ms;
    }

    /// Leverage last set for a symbol.
    #[must_use]
    pub fn leverage(&self, symbol: &str) -> Option<u32> {
        self.state.lock().leverage.get(symbol).copied()
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn venue(&self) -> &str {
        &self.name
    }

    async fn server_time(&self) -> Result<i64, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        Ok(Utc::now().timestamp_millis() + state.clock_offset_ms)
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let mut positions: Vec<VenuePosition> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn fetch_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderSnapshot>, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.status.is_open() && symbol.is_none_or(|s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn fetch_order(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderSnapshot, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state
            .orders
            .iter()
            .find(|o| o.id == order_id && o.symbol == symbol)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                message: format!("order {order_id} does not exist"),
            })
    }

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let mut fills: Vec<TradeFill> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol && t.timestamp >= since)
            .cloned()
            .collect();
        fills.sort_by_key(|t| t.timestamp);
        Ok(fills)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        if let Some(existing) = state
            .orders
            .iter()
            .find(|o| o.client_order_id.as_deref() == Some(request.client_order_id.as_str()))
        {
            return Ok(ack_of(existing));
        }

        if request.quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected {
                message: "invalid quantity".to_string(),
            });
        }

        let mut quantity = request.quantity;
        if request.reduce_only {
            let held = state.reducible(&request.symbol, request.side);
            if held.is_zero() {
                return Err(GatewayError::Rejected {
                    message: "reduce-only order rejected: no position to reduce".to_string(),
                });
            }
            if request.kind == OrderKind::Market {
                quantity = quantity.min(held);
            }
        }

        let id = state.next_id("paper");
        state.created_orders += 1;

        let mut order = OrderSnapshot {
            id: id.clone(),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            class: request.kind.class(),
            status: OrderStatus::Open,
            quantity,
            filled_quantity: Decimal::ZERO,
            price: request.price,
            trigger_price: request.trigger_price,
            average_price: None,
            reduce_only: request.reduce_only,
            created_at: Utc::now(),
        };

        match request.kind {
            OrderKind::Market => {
                let Some(price) = state.prices.get(&request.symbol).copied() else {
                    return Err(GatewayError::Rejected {
                        message: format!("no market price for {}", request.symbol),
                    });
                };
                state.execute(&request.symbol, request.side, quantity, price, &id);
                order.status = OrderStatus::Filled;
                order.filled_quantity = quantity;
                order.average_price = Some(price);
                state.refresh_pnl(&request.symbol);
            }
            OrderKind::Limit => {
                if request.price.is_none() {
                    return Err(GatewayError::Rejected {
                        message: "limit order requires a price".to_string(),
                    });
                }
            }
            _ => {
                if request.trigger_price.is_none() {
                    return Err(GatewayError::Rejected {
                        message: "conditional order requires a trigger price".to_string(),
                    });
                }
            }
        }

        let ack = ack_of(&order);
        state.orders.push(order);
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.symbol == symbol && o.status.is_open())
            .ok_or_else(|| GatewayError::NotFound {
                message: format!("unknown order {order_id}"),
            })?;
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        for order in state
            .orders
            .iter_mut()
            .filter(|o| o.symbol == symbol && o.status.is_open())
        {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        if leverage == 0 {
            return Err(GatewayError::Rejected {
                message: "leverage must be at least 1".to_string(),
            });
        }
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.margin.insert(symbol.to_string(), mode);
        Ok(())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let last = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::NotFound {
                message: format!("no market data for {symbol}"),
            })?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            timestamp: Utc::now(),
        })
    }

    async fn market_limits(&self, symbol: &str) -> Result<MarketLimits, GatewayError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        Ok(state.limits.get(symbol).copied().unwrap_or(DEFAULT_LIMITS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> PaperExchange {
        let venue = PaperExchange::new("paper");
        venue.set_price("BTCUSDT", dec!(50000));
        venue
    }

    #[tokio::test]
    async fn test_market_order_opens_position() {
        let venue = venue();
        let ack = venue
            .create_order(&OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01)))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.average_price, Some(dec!(50000)));
        let position = venue.position("BTCUSDT").unwrap();
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(position.quantity, dec!(0.01));
    }

    #[tokio::test]
    async fn test_client_order_id_is_idempotent() {
        let venue = venue();
        let request =
            OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01)).with_client_order_id("c-1");
        let first = venue.create_order(&request).await.unwrap();
        let second = venue.create_order(&request).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(venue.created_order_count(), 1);
        assert_eq!(venue.position("BTCUSDT").unwrap().quantity, dec!(0.01));
    }

    #[tokio::test]
    async fn test_stop_triggers_and_closes_position() {
        let venue = venue();
        venue
            .create_order(&OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01)))
            .await
            .unwrap();
        let stop = venue
            .create_order(&OrderRequest::stop_market(
                "BTCUSDT",
                OrderSide::Sell,
                dec!(0.01),
                dec!(49000),
            ))
            .await
            .unwrap();

        venue.set_price("BTCUSDT", dec!(49500));
        assert!(venue.position("BTCUSDT").is_some());

        venue.set_price("BTCUSDT", dec!(48900));
        assert!(venue.position("BTCUSDT").is_none());
        let order = venue.fetch_order(&stop.order_id, "BTCUSDT").await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_price, Some(dec!(48900)));
    }

    #[tokio::test]
    async fn test_reduce_only_without_position_rejected() {
        let venue = venue();
        let err = venue
            .create_order(&OrderRequest::stop_market(
                "BTCUSDT",
                OrderSide::Sell,
                dec!(0.01),
                dec!(49000),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_is_not_found() {
        let venue = venue();
        let err = venue.cancel_order("nope", "BTCUSDT").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let venue = venue();
        venue.inject_venue_error("connection reset by peer");
        assert!(venue.fetch_positions().await.is_err());
        assert!(venue.fetch_positions().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_orders_include_conditional() {
        let venue = venue();
        venue
            .create_order(&OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.01)))
            .await
            .unwrap();
        venue
            .create_order(&OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(0.01), dec!(45000)))
            .await
            .unwrap();
        venue
            .create_order(&OrderRequest::take_profit_market(
                "BTCUSDT",
                OrderSide::Sell,
                dec!(0.01),
                dec!(55000),
            ))
            .await
            .unwrap();

        let open = venue.fetch_open_orders(Some("BTCUSDT")).await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().any(|o| o.kind == OrderKind::TakeProfitMarket));
    }
}
