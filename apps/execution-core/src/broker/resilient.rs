//! Timeout, clock-skew recovery and backoff around any gateway.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::clock::ClockSync;
use super::retry::{ErrorCategory, ExponentialBackoffCalculator, RetryPolicy};
use crate::gateway::{
    ExchangeGateway, GatewayError, MarketLimits, OrderAck, OrderRequest, OrderSnapshot, Ticker,
    TradeFill, VenuePosition,
};
use crate::models::MarginMode;
use crate::observability::{record_gateway_failure, record_gateway_retry};

/// Wrapper settings.
#[derive(Debug, Clone)]
pub struct ResilientConfig {
    /// Backoff for rate-limit and transient failures.
    pub retry: RetryPolicy,
    /// Deadline applied to every individual call.
    pub call_timeout: Duration,
    /// Resync-and-retry rounds allowed per call on clock skew.
    pub max_skew_retries: u32,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            max_skew_retries: 1,
        }
    }
}

/// Decorates a venue gateway with per-call timeouts, clock resync on
/// timestamp rejections and bounded backoff on rate limits and transient
/// failures. Everything else propagates on the first failure.
pub struct ResilientGateway {
    inner: Arc<dyn ExchangeGateway>,
    clock: Arc<ClockSync>,
    config: ResilientConfig,
}

impl ResilientGateway {
    /// Wrap `inner`. `clock` must be the same instance the adapter signs with.
    pub fn new(
        inner: Arc<dyn ExchangeGateway>,
        clock: Arc<ClockSync>,
        config: ResilientConfig,
    ) -> Self {
        Self {
            inner,
            clock,
            config,
        }
    }

    /// Shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<ClockSync> {
        &self.clock
    }

    /// Measure the venue clock offset now, subject to the resync rate limit.
    ///
    /// Returns `Ok(false)` when skipped because the last attempt was too recent.
    pub async fn sync_clock(&self) -> Result<bool, GatewayError> {
        if !self.clock.try_begin_resync() {
            return Ok(false);
        }
        let sent = Utc::now().timestamp_millis();
        let server = tokio::time::timeout(self.config.call_timeout, self.inner.server_time())
            .await
            .map_err(|_| self.timeout_error())??;
        let received = Utc::now().timestamp_millis();
        self.clock.record_sync(server, sent, received);
        Ok(true)
    }

    fn timeout_error(&self) -> GatewayError {
        GatewayError::Timeout {
            elapsed_ms: self.config.call_timeout.as_millis() as u64,
        }
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        T: Send,
    {
        let venue = self.inner.venue();
        let mut backoff = ExponentialBackoffCalculator::new(&self.config.retry);
        let mut skew_retries = 0;

        loop {
            let result = match tokio::time::timeout(self.config.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error()),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let category = err.category();
            match category {
                ErrorCategory::ClockSkew => {
                    if skew_retries >= self.config.max_skew_retries {
                        warn!(venue, op, error = %err, "Clock skew persists after resync");
                        record_gateway_failure(venue, op, err.kind());
                        return Err(err);
                    }
                    skew_retries += 1;
                    match self.sync_clock().await {
                        Ok(true) => info!(venue, op, "Resynced clock after timestamp rejection"),
                        Ok(false) => debug!(venue, op, "Resync rate-limited, retrying with current offset"),
                        Err(sync_err) => warn!(venue, op, error = %sync_err, "Clock resync failed"),
                    }
                }
                ErrorCategory::RateLimited | ErrorCategory::Retryable => {
                    let delay = if category == ErrorCategory::RateLimited {
                        backoff.next_delay(err.retry_after())
                    } else {
                        backoff.next_backoff()
                    };
                    let Some(delay) = delay else {
                        warn!(
                            venue,
                            op,
                            attempts = backoff.current_attempt() + 1,
                            error = %err,
                            "Retries exhausted"
                        );
                        record_gateway_failure(venue, op, err.kind());
                        return Err(err);
                    };
                    debug!(
                        venue,
                        op,
                        attempt = backoff.current_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying venue call"
                    );
                    tokio::time::sleep(delay).await;
                }
                ErrorCategory::NonRetryable => {
                    debug!(venue, op, error = %err, "Venue call failed");
                    record_gateway_failure(venue, op, err.kind());
                    return Err(err);
                }
            }
            record_gateway_retry(venue, op, category.as_str());
        }
    }
}

#[async_trait]
impl ExchangeGateway for ResilientGateway {
    fn venue(&self) -> &str {
        self.inner.venue()
    }

    async fn server_time(&self) -> Result<i64, GatewayError> {
        self.call("server_time", || self.inner.server_time()).await
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, GatewayError> {
        self.call("fetch_positions", || self.inner.fetch_positions())
            .await
    }

    async fn fetch_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderSnapshot>, GatewayError> {
        self.call("fetch_open_orders", || self.inner.fetch_open_orders(symbol))
            .await
    }

    async fn fetch_order(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderSnapshot, GatewayError> {
        self.call("fetch_order", || self.inner.fetch_order(order_id, symbol))
            .await
    }

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeFill>, GatewayError> {
        self.call("fetch_my_trades", || self.inner.fetch_my_trades(symbol, since))
            .await
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        // Retries resend the same client order id, so the venue dedupes them.
        self.call("create_order", || self.inner.create_order(request))
            .await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), GatewayError> {
        self.call("cancel_order", || self.inner.cancel_order(order_id, symbol))
            .await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        self.call("cancel_all_orders", || self.inner.cancel_all_orders(symbol))
            .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        self.call("set_leverage", || self.inner.set_leverage(symbol, leverage))
            .await
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), GatewayError> {
        self.call("set_margin_mode", || self.inner.set_margin_mode(symbol, mode))
            .await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        self.call("fetch_ticker", || self.inner.fetch_ticker(symbol))
            .await
    }

    async fn market_limits(&self, symbol: &str) -> Result<MarketLimits, GatewayError> {
        self.call("market_limits", || self.inner.market_limits(symbol))
            .await
    }
}
