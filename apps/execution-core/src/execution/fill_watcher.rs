//! Background polling of resting entry orders.
//!
//! One watcher per PENDING key. It exits when the record leaves PENDING,
//! on shutdown, or once its order resolves.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::{ExecutionEngine, PendingResolution};
use crate::error::ExecutionError;
use crate::models::{OrderStatus, PosKey, PositionSide, PositionStatus};

/// State of a pending entry after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    /// Entry order still working.
    Waiting,
    /// Promoted to FILLED.
    Filled,
    /// Archived as CANCELLED.
    Cancelled,
    /// No PENDING record under the key.
    Gone,
}

impl From<&PendingResolution> for WatchStatus {
    fn from(resolution: &PendingResolution) -> Self {
        match resolution {
            PendingResolution::Promoted(_) => Self::Filled,
            PendingResolution::Cancelled(_) => Self::Cancelled,
        }
    }
}

impl ExecutionEngine {
    /// Start a watcher for `key` unless one already runs. Returns whether a
    /// new task was spawned.
    pub fn spawn_fill_watcher(self: &Arc<Self>, key: PosKey) -> bool {
        if !self.watchers.lock().insert(key.clone()) {
            return false;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.fill_poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; give the order a period to work.
            interval.tick().await;

            loop {
                tokio::select! {
                    () = engine.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match engine.poll_pending(&key).await {
                    Ok(WatchStatus::Waiting) => {}
                    Ok(status) => {
                        debug!(pos_key = %key, ?status, "Fill watcher done");
                        break;
                    }
                    Err(e) => warn!(pos_key = %key, error = %e, "Fill poll failed"),
                }
            }

            engine.watchers.lock().remove(&key);
        });
        true
    }

    /// Check one pending entry: promote on fill, cancel past the TTL, and
    /// resolve orders that are gone from the venue.
    pub async fn poll_pending(&self, key: &PosKey) -> Result<WatchStatus, ExecutionError> {
        let _guard = self.lock_position(key).await;
        let Some(position) = self
            .book()
            .get(key)
            .filter(|p| p.status == PositionStatus::Pending)
        else {
            return Ok(WatchStatus::Gone);
        };
        let Some(pending) = position.pending.clone() else {
            return Ok(WatchStatus::Gone);
        };

        if Utc::now() - pending.placed_at >= self.config.pending_order_ttl {
            info!(pos_key = %key, placed_at = %pending.placed_at, "Pending entry expired");
            let resolution = self.cancel_pending_locked(position, "expired").await?;
            return Ok(self.after_resolution(key, &resolution).await);
        }

        // Without a venue id the reconciler matches the order by client id.
        let Some(order_id) = pending.order_id else {
            return Ok(WatchStatus::Waiting);
        };

        let order = match self.gateway().fetch_order(&order_id, &position.symbol).await {
            Ok(order) => Some(order),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        match order {
            Some(order) if order.status.is_open() => Ok(WatchStatus::Waiting),
            Some(order)
                if order.status == OrderStatus::Filled
                    || order.filled_quantity > Decimal::ZERO =>
            {
                let price = order
                    .average_price
                    .or(order.price)
                    .unwrap_or(position.entry_price);
                let promoted = self
                    .promote_locked(position, price, order.filled_quantity)
                    .await?;
                Ok(self
                    .after_resolution(key, &PendingResolution::Promoted(promoted))
                    .await)
            }
            _ => {
                debug!(pos_key = %key, order_id, "Entry order no longer open");
                let venue_positions = self.gateway().fetch_positions().await?;
                let claimed = self.claimed_venue_positions();
                let resolution = self
                    .resolve_inactive_pending_locked(position, &venue_positions, &claimed)
                    .await?;
                Ok(self.after_resolution(key, &resolution).await)
            }
        }
    }

    async fn after_resolution(&self, key: &PosKey, resolution: &PendingResolution) -> WatchStatus {
        if matches!(resolution, PendingResolution::Promoted(_)) {
            if let Err(e) = self.ensure_protection_locked(key, None).await {
                warn!(
                    pos_key = %key,
                    error = %e,
                    "Protective placement failed after fill, reconciliation will retry"
                );
            }
            self.reconcile_trigger().request();
        }
        WatchStatus::from(resolution)
    }

    /// Venue positions already backing a FILLED record.
    pub(crate) fn claimed_venue_positions(&self) -> HashSet<(String, PositionSide)> {
        self.book()
            .positions_with_status(PositionStatus::Filled)
            .into_iter()
            .map(|p| (p.symbol, p.side))
            .collect()
    }
}
