//! Local-state reconciliation against the venue.
//!
//! The venue is authoritative for position existence, size and entry price,
//! and for which orders are open. A pass:
//!
//! 1. fetches venue positions and open orders
//! 2. closes FILLED records the venue no longer holds (ghosts)
//! 3. resolves PENDING records whose entry order is no longer open
//! 4. syncs size and protective orders of every FILLED record
//! 5. adopts venue positions nobody tracks (orphans)
//!
//! Every mutation happens under the engine's per-position lock. The
//! snapshot is taken before any lock, so a record that changed since, or
//! that references an order the snapshot lacks, is decided from a fresh
//! venue read instead. One position's failure is recorded in the report and
//! the pass continues.

mod config;
mod discrepancy;
mod error;
mod report;

pub use config::ReconciliationConfig;
pub use discrepancy::{Discrepancy, DiscrepancySeverity, DiscrepancyType};
pub use error::ReconciliationError;
pub use report::ReconciliationReport;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{ExecutionEngine, PendingResolution};
use super::lifecycle::{LifecycleState, PositionLifecycle};
use super::protection::{ProtectionOutcome, level_from_pct};
use crate::gateway::{GatewayError, OrderSnapshot, VenuePosition};
use crate::models::{PosKey, Position, PositionSide, PositionStatus, ProtectiveLeg};
use crate::notify::TradeEvent;
use crate::observability::{record_reconciliation, update_open_positions};

/// Runs reconciliation passes for one engine. Passes never overlap.
pub struct Reconciler {
    engine: Arc<ExecutionEngine>,
    config: ReconciliationConfig,
    running: tokio::sync::Mutex<()>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(engine: Arc<ExecutionEngine>, config: ReconciliationConfig) -> Self {
        Self {
            engine,
            config,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Run one pass.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let _running = self.running.lock().await;
        let start = Instant::now();
        debug!("Starting reconciliation");

        let gateway = self.engine.gateway();
        let snapshot_at = Utc::now();
        let venue_positions = gateway
            .fetch_positions()
            .await
            .map_err(ReconciliationError::Snapshot)?;
        let open_orders = gateway
            .fetch_open_orders(None)
            .await
            .map_err(ReconciliationError::Snapshot)?;

        let mut report = ReconciliationReport {
            positions_compared: venue_positions.len(),
            orders_compared: open_orders.len(),
            ..ReconciliationReport::default()
        };

        self.resolve_ghosts(&venue_positions, &mut report).await;
        self.resolve_pending(&open_orders, &mut report).await;

        let filled = self.engine.book().positions_with_status(PositionStatus::Filled);
        let mut claimed_orders: HashSet<String> = filled
            .iter()
            .flat_map(|p| p.protective_order_ids().map(str::to_string))
            .collect();
        for position in &filled {
            self.recover_position(
                &position.key,
                &venue_positions,
                &open_orders,
                snapshot_at,
                &mut claimed_orders,
                &mut report,
            )
            .await;
        }

        if self.config.adopt_orphans {
            self.adopt_orphans(
                &venue_positions,
                &open_orders,
                snapshot_at,
                &mut claimed_orders,
                &mut report,
            )
            .await;
        }

        self.engine.prune_locks();
        self.engine.cooldowns().purge_expired().await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        report.finish(duration_ms);

        let open = self
            .engine
            .book()
            .positions_with_status(PositionStatus::Filled)
            .len();
        update_open_positions(open);
        record_reconciliation(report.passed, report.discrepancies.len(), duration_ms);

        info!(
            passed = report.passed,
            discrepancies = report.discrepancies.len(),
            ghosts_closed = report.ghosts_closed,
            pending_promoted = report.pending_promoted,
            protective_adopted = report.protective_adopted,
            protective_created = report.protective_created,
            orphans_adopted = report.orphans_adopted,
            errors = report.errors.len(),
            duration_ms,
            "Reconciliation completed"
        );

        Ok(report)
    }

    /// Run passes on the configured interval and on every trigger until
    /// `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let trigger = self.engine.reconcile_trigger().clone();
            let mut interval =
                tokio::time::interval(self.config.interval.max(Duration::from_secs(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                    () = trigger.requested() => debug!("Reconciliation requested"),
                }

                if let Err(e) = self.reconcile().await {
                    error!(error = %e, "Reconciliation failed");
                }
            }
            info!("Reconciliation loop stopped");
        })
    }

    // ========================================================================
    // Step 2: ghosts
    // ========================================================================

    async fn resolve_ghosts(
        &self,
        venue_positions: &[VenuePosition],
        report: &mut ReconciliationReport,
    ) {
        let candidates = self.engine.book().positions_with_status(PositionStatus::Filled);
        for candidate in candidates {
            if venue_holds(venue_positions, &candidate) {
                continue;
            }

            let key = candidate.key.clone();
            let _guard = self.engine.lock_position(&key).await;
            let Some(position) = self
                .engine
                .book()
                .get(&key)
                .filter(|p| p.status == PositionStatus::Filled)
            else {
                continue;
            };
            if Utc::now() - position.updated_at < self.config.ghost_grace_period {
                debug!(pos_key = %key, "Recently updated, not treating as ghost yet");
                continue;
            }
            match self.engine.gateway().fetch_positions().await {
                Ok(fresh) if venue_holds(&fresh, &position) => {
                    debug!(pos_key = %key, "Position opened after snapshot, not a ghost");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    report.record_error(key.as_str(), e);
                    continue;
                }
            }

            let local = format!("FILLED {} {} @ {}", position.side, position.quantity, position.entry_price);
            match self.engine.resolve_ghost_locked(position).await {
                Ok(closed) => {
                    report.ghosts_closed += 1;
                    let action = closed.exit.as_ref().map_or_else(
                        || "closed".to_string(),
                        |exit| format!("closed at {} ({})", exit.price, exit.reason),
                    );
                    report.push(Discrepancy::resolved(
                        DiscrepancyType::GhostPosition,
                        key.as_str(),
                        local,
                        "flat",
                        action,
                    ));
                }
                Err(e) => report.record_error(key.as_str(), e),
            }
        }
    }

    // ========================================================================
    // Step 3: pending entries
    // ========================================================================

    async fn resolve_pending(
        &self,
        open_orders: &[OrderSnapshot],
        report: &mut ReconciliationReport,
    ) {
        let candidates = self.engine.book().positions_with_status(PositionStatus::Pending);
        for candidate in candidates {
            let key = candidate.key.clone();
            let _guard = self.engine.lock_position(&key).await;
            let Some(mut position) = self
                .engine
                .book()
                .get(&key)
                .filter(|p| p.status == PositionStatus::Pending)
            else {
                continue;
            };
            let Some(pending) = position.pending.clone() else {
                continue;
            };

            let is_entry = |o: &&OrderSnapshot| match pending.order_id.as_deref() {
                Some(id) => o.id == id,
                None => o.client_order_id.as_deref() == Some(pending.client_order_id.as_str()),
            };

            // Absent from the snapshot is not enough: the order may have been
            // placed while this pass waited on the lock.
            let (working, venue_positions) = match open_orders.iter().find(is_entry) {
                Some(order) => (Some(order.clone()), Vec::new()),
                None => match self.fresh_view(&position.symbol).await {
                    Ok((positions, orders)) => (orders.iter().find(is_entry).cloned(), positions),
                    Err(e) => {
                        report.record_error(key.as_str(), e);
                        continue;
                    }
                },
            };

            if let Some(order) = working {
                if pending.order_id.is_none() {
                    info!(pos_key = %key, order_id = %order.id, "Recovered entry order id");
                    position.entry_order_id = Some(order.id.clone());
                    if let Some(p) = position.pending.as_mut() {
                        p.order_id = Some(order.id.clone());
                    }
                    position.touch();
                    self.engine.book().persist(&position).await;
                }
                if self.engine.spawn_fill_watcher(key.clone()) {
                    report.watchers_respawned += 1;
                }
                continue;
            }

            let claimed = self.engine.claimed_venue_positions();
            let local = format!("PENDING {} {} @ {}", position.side, pending.quantity, pending.price);
            match self
                .engine
                .resolve_inactive_pending_locked(position, &venue_positions, &claimed)
                .await
            {
                Ok(PendingResolution::Promoted(filled)) => {
                    report.pending_promoted += 1;
                    report.push(Discrepancy::resolved(
                        DiscrepancyType::PendingResolved,
                        key.as_str(),
                        local,
                        format!("position {} @ {}", filled.quantity, filled.entry_price),
                        "promoted to FILLED",
                    ));
                }
                Ok(PendingResolution::Cancelled(_)) => {
                    report.pending_cancelled += 1;
                    report.push(Discrepancy::resolved(
                        DiscrepancyType::PendingResolved,
                        key.as_str(),
                        local,
                        "no order, no position",
                        "cancelled",
                    ));
                }
                Err(e) => report.record_error(key.as_str(), e),
            }
        }
    }

    // ========================================================================
    // Step 4: size and protection
    // ========================================================================

    async fn recover_position(
        &self,
        key: &PosKey,
        venue_positions: &[VenuePosition],
        open_orders: &[OrderSnapshot],
        snapshot_at: DateTime<Utc>,
        claimed_orders: &mut HashSet<String>,
        report: &mut ReconciliationReport,
    ) {
        let _guard = self.engine.lock_position(key).await;
        let Some(mut position) = self
            .engine
            .book()
            .get(key)
            .filter(|p| p.status == PositionStatus::Filled)
        else {
            return;
        };

        let refreshed;
        let (venue_positions, open_orders) = if outdated_for(&position, snapshot_at, open_orders) {
            refreshed = match self.fresh_view(&position.symbol).await {
                Ok(view) => view,
                Err(e) => {
                    report.record_error(key.as_str(), e);
                    return;
                }
            };
            (refreshed.0.as_slice(), refreshed.1.as_slice())
        } else {
            (venue_positions, open_orders)
        };
        // Inside the ghost grace period.
        let Some(held) = venue_positions
            .iter()
            .find(|v| v.symbol == position.symbol && v.side == position.side)
        else {
            return;
        };

        let mut changed = false;

        if held.quantity != position.quantity || held.entry_price != position.entry_price {
            report.quantities_synced += 1;
            report.push(Discrepancy::resolved(
                DiscrepancyType::QuantityMismatch,
                key.as_str(),
                format!("{} @ {}", position.quantity, position.entry_price),
                format!("{} @ {}", held.quantity, held.entry_price),
                "synced from venue",
            ));
            position.quantity = held.quantity;
            position.entry_price = held.entry_price;
            changed = true;
        }

        for leg in ProtectiveLeg::ALL {
            let Some(order_id) = position.protective_order_id(leg).map(str::to_string) else {
                continue;
            };
            match open_orders.iter().find(|o| o.id == order_id) {
                None => {
                    report.stale_ids_cleared += 1;
                    report.push(Discrepancy::resolved(
                        DiscrepancyType::StaleProtectiveOrder,
                        order_id.as_str(),
                        format!("{} {leg}", key),
                        "not open",
                        "cleared",
                    ));
                    position.set_protective_order_id(leg, None);
                    changed = true;
                }
                Some(order) if order.quantity > position.quantity => {
                    match self
                        .engine
                        .gateway()
                        .cancel_order(&order_id, &position.symbol)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            report.record_error(order_id.as_str(), e);
                            continue;
                        }
                    }
                    report.stale_ids_cleared += 1;
                    report.push(Discrepancy::resolved(
                        DiscrepancyType::OversizedProtectiveOrder,
                        order_id.as_str(),
                        format!("{} {leg} for {}", key, position.quantity),
                        format!("order for {}", order.quantity),
                        "cancelled and cleared",
                    ));
                    position.set_protective_order_id(leg, None);
                    changed = true;
                }
                Some(_) => {}
            }
        }

        let exit_side = position.side.exit_side();
        for leg in ProtectiveLeg::ALL {
            if position.protective_order_id(leg).is_some() {
                continue;
            }
            let candidate = open_orders.iter().find(|o| {
                o.symbol == position.symbol
                    && o.side == exit_side
                    && o.reduce_only
                    && leg.accepts(o.kind)
                    && (o.quantity - position.quantity).abs() <= self.config.quantity_tolerance
                    && !claimed_orders.contains(&o.id)
            });
            let Some(order) = candidate else {
                continue;
            };

            claimed_orders.insert(order.id.clone());
            position.set_protective_order_id(leg, Some(order.id.clone()));
            if position.level(leg).is_none() {
                if let Some(level) = order.protective_level() {
                    position.set_level(leg, level);
                }
            }
            report.protective_adopted += 1;
            report.push(Discrepancy::resolved(
                DiscrepancyType::ProtectiveAdopted,
                order.id.as_str(),
                format!("{} {leg} missing", key),
                format!("{} {} @ {:?}", order.kind, order.quantity, order.protective_level()),
                "adopted",
            ));
            info!(pos_key = %key, leg = leg.as_str(), order_id = %order.id, "Adopted protective order");
            changed = true;
        }

        if changed {
            position.touch();
            self.engine.book().persist(&position).await;
        }

        for leg in ProtectiveLeg::ALL {
            if position.level(leg).is_none() && position.protective_order_id(leg).is_none() {
                report.push(Discrepancy::unresolved(
                    DiscrepancyType::UnprotectedLeg,
                    key.as_str(),
                    format!("{leg} has no level"),
                    "no order",
                    DiscrepancySeverity::Warning,
                    format!("configure a {leg} level"),
                ));
            }
        }

        let missing = position.missing_protection();
        if missing.is_empty() {
            return;
        }
        if !self.config.auto_create_protection {
            for leg in missing {
                report.push(Discrepancy::unresolved(
                    DiscrepancyType::UnprotectedLeg,
                    key.as_str(),
                    format!("{leg} at {:?}", position.level(leg)),
                    "no order",
                    DiscrepancySeverity::Critical,
                    format!("place {leg} order"),
                ));
            }
            return;
        }

        match self.engine.ensure_protection_locked(key, None).await {
            Ok(ProtectionOutcome::Placed {
                stop_loss,
                take_profit,
            }) => {
                report.protective_created +=
                    usize::from(stop_loss.is_some()) + usize::from(take_profit.is_some());
            }
            Ok(ProtectionOutcome::PreEmptedExit(reason)) => {
                report.push(Discrepancy::resolved(
                    DiscrepancyType::UnprotectedLeg,
                    key.as_str(),
                    "protection missing",
                    "price through level",
                    format!("closed at market ({reason})"),
                ));
            }
            Ok(ProtectionOutcome::Unchanged | ProtectionOutcome::Skipped) => {}
            Err(e) => report.record_error(key.as_str(), e),
        }
    }

    // ========================================================================
    // Step 5: orphans
    // ========================================================================

    async fn adopt_orphans(
        &self,
        venue_positions: &[VenuePosition],
        open_orders: &[OrderSnapshot],
        snapshot_at: DateTime<Utc>,
        claimed_orders: &mut HashSet<String>,
        report: &mut ReconciliationReport,
    ) {
        let tracked: HashSet<(String, PositionSide)> = self
            .engine
            .book()
            .positions()
            .into_iter()
            .filter(|p| p.status.is_live())
            .map(|p| (p.symbol, p.side))
            .collect();

        for held in venue_positions {
            if tracked.contains(&(held.symbol.clone(), held.side)) {
                continue;
            }

            let key = self
                .engine
                .pos_key(&held.symbol, &self.config.orphan_timeframe);
            {
                let _guard = self.engine.lock_position(&key).await;
                // The engine may have opened or closed this position since the snapshot.
                let (fresh_positions, _) = match self.fresh_view(&held.symbol).await {
                    Ok(view) => view,
                    Err(e) => {
                        report.record_error(key.as_str(), e);
                        continue;
                    }
                };
                let Some(held) = fresh_positions
                    .into_iter()
                    .find(|v| v.symbol == held.symbol && v.side == held.side)
                else {
                    continue;
                };
                if self.engine.book().positions().iter().any(|p| {
                    p.status.is_live() && p.symbol == held.symbol && p.side == held.side
                }) {
                    continue;
                }
                if let Some(existing) = self.engine.book().get(&key) {
                    report.push(Discrepancy::unresolved(
                        DiscrepancyType::OrphanPosition,
                        key.as_str(),
                        format!("{} {}", existing.status, existing.side),
                        format!("{} {} @ {}", held.side, held.quantity, held.entry_price),
                        DiscrepancySeverity::Critical,
                        "slot occupied, resolve manually",
                    ));
                    continue;
                }

                let position = self.orphan_record(key.clone(), &held);
                if let Err(e) =
                    PositionLifecycle::validate_transition(key.as_str(), LifecycleState::None, LifecycleState::Filled)
                {
                    report.record_error(key.as_str(), e);
                    continue;
                }
                if let Err(e) = self.engine.book().put_durable(&position).await {
                    report.record_error(key.as_str(), e);
                    continue;
                }

                report.orphans_adopted += 1;
                report.push(Discrepancy::resolved(
                    DiscrepancyType::OrphanPosition,
                    key.as_str(),
                    "none",
                    format!("{} {} @ {}", held.side, held.quantity, held.entry_price),
                    "adopted",
                ));
                warn!(
                    pos_key = %key,
                    side = %held.side,
                    quantity = %held.quantity,
                    entry_price = %held.entry_price,
                    "Adopted orphan venue position"
                );
                self.engine
                    .notify(TradeEvent::OrphanAdopted {
                        key: key.clone(),
                        side: held.side,
                        quantity: held.quantity,
                        entry_price: held.entry_price,
                    })
                    .await;
            }

            self.recover_position(
                &key,
                venue_positions,
                open_orders,
                snapshot_at,
                claimed_orders,
                report,
            )
            .await;
        }
    }

    /// All venue positions and the open orders on `symbol`, read now.
    async fn fresh_view(
        &self,
        symbol: &str,
    ) -> Result<(Vec<VenuePosition>, Vec<OrderSnapshot>), GatewayError> {
        let gateway = self.engine.gateway();
        let positions = gateway.fetch_positions().await?;
        let orders = gateway.fetch_open_orders(Some(symbol)).await?;
        Ok((positions, orders))
    }

    fn orphan_record(&self, key: PosKey, held: &VenuePosition) -> Position {
        let mut position = Position::filled(
            key,
            &held.symbol,
            &self.config.orphan_timeframe,
            held.side,
            held.quantity,
            held.entry_price,
        )
        .with_leverage(held.leverage);
        position.adopted = true;
        position.stop_loss = self.config.orphan_stop_loss_pct.map(|pct| {
            level_from_pct(held.side, ProtectiveLeg::StopLoss, held.entry_price, pct)
        });
        position.take_profit = self.config.orphan_take_profit_pct.map(|pct| {
            level_from_pct(held.side, ProtectiveLeg::TakeProfit, held.entry_price, pct)
        });
        position
    }
}

/// True when the snapshot cannot be trusted for `position`: the record
/// changed after it was taken, or it references an order the snapshot lacks.
fn outdated_for(
    position: &Position,
    snapshot_at: DateTime<Utc>,
    open_orders: &[OrderSnapshot],
) -> bool {
    position.updated_at >= snapshot_at
        || position
            .protective_order_ids()
            .any(|id| !open_orders.iter().any(|o| o.id == id))
}

fn venue_holds(venue_positions: &[VenuePosition], position: &Position) -> bool {
    venue_positions
        .iter()
        .any(|v| v.symbol == position.symbol && v.side == position.side)
}
