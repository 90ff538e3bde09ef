//! Core domain models for the execution engine.
//!
//! Positions, order enums, cooldowns and strategy signals. Venue-facing
//! snapshot types live in [`crate::gateway`].

mod cooldown;
mod order;
mod position;
mod signal;

pub use cooldown::CooldownEntry;
pub use order::{MarginMode, OrderClass, OrderKind, OrderSide, OrderStatus, ProtectiveLeg};
pub use position::{
    ExitReason, ExitRecord, PendingOrderRef, PosKey, Position, PositionSide, PositionStatus,
    StrategyMetadata, TradeRecord,
};
pub use signal::{EntryType, NoSignals, SignalError, SignalSource, TradeSignal};
