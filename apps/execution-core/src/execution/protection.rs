//! Protective stop-loss / take-profit placement.
//!
//! Placement is idempotent: a leg with a recorded order id is left alone.
//! If price already trades through a level that is about to be placed, the
//! position is closed at market instead.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::engine::ExecutionEngine;
use crate::error::ExecutionError;
use crate::gateway::OrderRequest;
use crate::models::{ExitReason, PosKey, Position, PositionSide, PositionStatus, ProtectiveLeg};
use crate::notify::TradeEvent;
use crate::observability::{record_preempted_exit, record_protective_order};

/// Result of [`ExecutionEngine::ensure_protection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionOutcome {
    /// New orders were placed. Ids of the legs placed in this call.
    Placed {
        /// New stop-loss order id.
        stop_loss: Option<String>,
        /// New take-profit order id.
        take_profit: Option<String>,
    },
    /// Every leg with a level already has an order.
    Unchanged,
    /// Price was through a level, so the position was closed instead.
    PreEmptedExit(ExitReason),
    /// No FILLED record for the key.
    Skipped,
}

/// Quantity for protective orders: the requested size, never more than the
/// stored position size. Non-positive requests fall back to the stored size.
#[must_use]
pub fn clamp_protective_qty(requested: Option<Decimal>, stored: Decimal) -> Decimal {
    match requested {
        Some(quantity) if quantity > Decimal::ZERO => quantity.min(stored),
        _ => stored,
    }
}

/// Level `pct` away from `reference` on the losing side for stops and the
/// winning side for targets.
#[must_use]
pub fn level_from_pct(
    side: PositionSide,
    leg: ProtectiveLeg,
    reference: Decimal,
    pct: Decimal,
) -> Decimal {
    match (side, leg) {
        (PositionSide::Long, ProtectiveLeg::StopLoss)
        | (PositionSide::Short, ProtectiveLeg::TakeProfit) => reference * (Decimal::ONE - pct),
        (PositionSide::Long, ProtectiveLeg::TakeProfit)
        | (PositionSide::Short, ProtectiveLeg::StopLoss) => reference * (Decimal::ONE + pct),
    }
}

impl ExecutionEngine {
    /// Place any missing protective orders for a FILLED position.
    ///
    /// `quantity` overrides the order size, clamped to the stored size.
    pub async fn ensure_protection(
        &self,
        key: &PosKey,
        quantity: Option<Decimal>,
    ) -> Result<ProtectionOutcome, ExecutionError> {
        let _guard = self.lock_position(key).await;
        self.ensure_protection_locked(key, quantity).await
    }

    pub(crate) async fn ensure_protection_locked(
        &self,
        key: &PosKey,
        quantity: Option<Decimal>,
    ) -> Result<ProtectionOutcome, ExecutionError> {
        let Some(mut position) = self
            .book()
            .get(key)
            .filter(|p| p.status == PositionStatus::Filled)
        else {
            return Ok(ProtectionOutcome::Skipped);
        };

        for leg in ProtectiveLeg::ALL {
            if position.level(leg).is_none() {
                debug!(pos_key = %key, leg = leg.as_str(), "No level configured");
            }
        }

        let missing = position.missing_protection();
        if missing.is_empty() {
            return Ok(ProtectionOutcome::Unchanged);
        }

        let quantity = clamp_protective_qty(quantity, position.quantity);
        let mut last = self.gateway().fetch_ticker(&position.symbol).await?.last;
        if let Some(reason) = self.preempting_exit(&position, &missing, last) {
            return self.preempt(position, reason, last).await;
        }

        let mut placed_stop = None;
        let mut placed_target = None;
        let mut first_error = None;

        for leg in missing {
            if leg == ProtectiveLeg::TakeProfit && placed_stop.is_some() {
                // Price may have moved while the stop was being placed.
                last = self.gateway().fetch_ticker(&position.symbol).await?.last;
                if let Some(reason) = self.preempting_exit(&position, &[leg], last) {
                    return self.preempt(position, reason, last).await;
                }
            }

            let Some(level) = position.level(leg) else {
                continue;
            };
            let exit_side = position.side.exit_side();
            let order = match leg {
                ProtectiveLeg::StopLoss => {
                    OrderRequest::stop_market(&position.symbol, exit_side, quantity, level)
                }
                ProtectiveLeg::TakeProfit => {
                    OrderRequest::take_profit_market(&position.symbol, exit_side, quantity, level)
                }
            };

            let placed = self.gateway().create_order(&order).await;
            let ack = match self.venue_call(placed).await {
                Ok(ack) => ack,
                Err(e) => {
                    warn!(
                        pos_key = %key,
                        leg = leg.as_str(),
                        level = %level,
                        error = %e,
                        "Protective order placement failed"
                    );
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            position.set_protective_order_id(leg, Some(ack.order_id.clone()));
            position.touch();
            self.book().persist(&position).await;

            record_protective_order(leg.as_str());
            info!(
                pos_key = %key,
                leg = leg.as_str(),
                level = %level,
                quantity = %quantity,
                order_id = %ack.order_id,
                "Protective order placed"
            );
            self.notify(TradeEvent::ProtectionPlaced {
                key: key.clone(),
                leg,
                level,
                quantity,
                order_id: ack.order_id.clone(),
            })
            .await;

            match leg {
                ProtectiveLeg::StopLoss => placed_stop = Some(ack.order_id),
                ProtectiveLeg::TakeProfit => placed_target = Some(ack.order_id),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(ProtectionOutcome::Placed {
            stop_loss: placed_stop,
            take_profit: placed_target,
        })
    }

    /// Exit reason if `last` is already through a level among `legs`.
    fn preempting_exit(
        &self,
        position: &Position,
        legs: &[ProtectiveLeg],
        last: Decimal,
    ) -> Option<ExitReason> {
        if legs.contains(&ProtectiveLeg::StopLoss) && position.stop_breached(last) {
            return Some(ExitReason::UrgentStopLoss);
        }
        if legs.contains(&ProtectiveLeg::TakeProfit)
            && position.take_profit_reached(last, self.config.take_profit_tolerance_pct)
        {
            return Some(ExitReason::UrgentTakeProfit);
        }
        None
    }

    async fn preempt(
        &self,
        position: Position,
        reason: ExitReason,
        last: Decimal,
    ) -> Result<ProtectionOutcome, ExecutionError> {
        warn!(
            pos_key = %position.key,
            price = %last,
            reason = %reason,
            "Price already through protective level, closing at market"
        );
        record_preempted_exit(reason.as_str());
        self.close_locked(position, reason).await?;
        Ok(ProtectionOutcome::PreEmptedExit(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_level_from_pct() {
        let long_stop = level_from_pct(
            PositionSide::Long,
            ProtectiveLeg::StopLoss,
            dec!(50000),
            dec!(0.02),
        );
        let short_stop = level_from_pct(
            PositionSide::Short,
            ProtectiveLeg::StopLoss,
            dec!(50000),
            dec!(0.02),
        );
        let short_target = level_from_pct(
            PositionSide::Short,
            ProtectiveLeg::TakeProfit,
            dec!(50000),
            dec!(0.04),
        );

        assert_eq!(long_stop, dec!(49000));
        assert_eq!(short_stop, dec!(51000));
        assert_eq!(short_target, dec!(48000));
    }

    #[test]
    fn test_clamp_ignores_non_positive_request() {
        assert_eq!(clamp_protective_qty(Some(dec!(0)), dec!(2)), dec!(2));
        assert_eq!(clamp_protective_qty(None, dec!(2)), dec!(2));
        assert_eq!(clamp_protective_qty(Some(dec!(0.5)), dec!(2)), dec!(0.5));
    }

    proptest! {
        #[test]
        fn prop_clamp_never_exceeds_stored(requested in 0i64..1_000_000, stored in 1i64..1_000_000) {
            let requested = Decimal::new(requested, 3);
            let stored = Decimal::new(stored, 3);
            let quantity = clamp_protective_qty(Some(requested), stored);

            prop_assert!(quantity <= stored);
            prop_assert!(quantity > Decimal::ZERO);
        }
    }
}
