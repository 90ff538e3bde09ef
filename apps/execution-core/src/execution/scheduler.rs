//! Per symbol/timeframe evaluation loops.
//!
//! Each slot ticks independently: a FILLED slot is checked for exits, an
//! empty slot asks the signal source for an entry, a PENDING slot is left to
//! its fill watcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{EntryOutcome, ExecutionEngine};
use crate::error::ExecutionError;
use crate::models::{ExitReason, PositionStatus, SignalSource};

/// Which slots to evaluate and how often.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Venue symbols.
    pub symbols: Vec<String>,
    /// Strategy timeframes evaluated for every symbol.
    pub timeframes: Vec<String>,
    /// Evaluation period per slot.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: vec!["15m".to_string()],
            tick_interval: Duration::from_secs(30),
        }
    }
}

/// What one evaluation did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing to do.
    Idle,
    /// Open position exited.
    Exited(ExitReason),
    /// Entry attempted.
    Entry(EntryOutcome),
}

/// Drives the engine from a [`SignalSource`].
pub struct Scheduler {
    engine: Arc<ExecutionEngine>,
    signals: Arc<dyn SignalSource>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(
        engine: Arc<ExecutionEngine>,
        signals: Arc<dyn SignalSource>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            signals,
            config,
        }
    }

    /// Spawn one loop per symbol/timeframe. Loops stop when `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for symbol in &self.config.symbols {
            for timeframe in &self.config.timeframes {
                let scheduler = Arc::clone(&self);
                let shutdown = shutdown.clone();
                let symbol = symbol.clone();
                let timeframe = timeframe.clone();
                handles.push(tokio::spawn(async move {
                    scheduler.run_slot(&symbol, &timeframe, shutdown).await;
                }));
            }
        }
        info!(slots = handles.len(), "Scheduler started");
        handles
    }

    async fn run_slot(&self, symbol: &str, timeframe: &str, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval.max(Duration::from_millis(100)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.evaluate_once(symbol, timeframe).await {
                Ok(TickOutcome::Idle) => {}
                Ok(outcome) => debug!(symbol, timeframe, ?outcome, "Tick"),
                Err(e) => warn!(symbol, timeframe, error = %e, "Evaluation failed"),
            }
        }
        debug!(symbol, timeframe, "Slot loop stopped");
    }

    /// Evaluate one slot once.
    pub async fn evaluate_once(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<TickOutcome, ExecutionError> {
        let key = self.engine.pos_key(symbol, timeframe);
        match self.engine.book().get(&key).map(|p| p.status) {
            Some(PositionStatus::Filled) => Ok(self
                .engine
                .evaluate_exit(&key)
                .await?
                .map_or(TickOutcome::Idle, TickOutcome::Exited)),
            Some(PositionStatus::Pending) => Ok(TickOutcome::Idle),
            Some(PositionStatus::Closed | PositionStatus::Cancelled) | None => {
                let signal = match self.signals.evaluate(symbol, timeframe).await {
                    Ok(Some(signal)) => signal,
                    Ok(None) => return Ok(TickOutcome::Idle),
                    Err(e) => {
                        warn!(symbol, timeframe, error = %e, "Signal source failed");
                        return Ok(TickOutcome::Idle);
                    }
                };
                self.engine
                    .evaluate_signal(signal)
                    .await
                    .map(TickOutcome::Entry)
            }
        }
    }
}
