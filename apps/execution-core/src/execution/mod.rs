//! Position lifecycle execution and venue reconciliation.
//!
//! [`ExecutionEngine`] owns entries, exits, cancellations and protective
//! order placement. [`Reconciler`] converges local records with the venue,
//! and [`Scheduler`] drives the engine from a signal source.

mod cooldown;
mod engine;
mod fill_watcher;
mod lifecycle;
mod locks;
mod protection;
pub mod reconciliation;
mod scheduler;

pub use cooldown::CooldownManager;
pub use engine::{
    EngineConfig, EngineDeps, EntryOutcome, EntryRequest, ExecutionEngine, PendingResolution,
    ReconcileTrigger, SkipReason,
};
pub use fill_watcher::WatchStatus;
pub use lifecycle::{LifecycleState, PositionLifecycle};
pub use locks::{KeyGuard, LockRegistry};
pub use protection::{ProtectionOutcome, clamp_protective_qty, level_from_pct};
pub use reconciliation::{ReconciliationConfig, ReconciliationReport, Reconciler};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};
