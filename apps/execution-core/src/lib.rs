// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Execution Core - position lifecycle and venue reconciliation
//!
//! Keeps a durable local model of leveraged perpetual-futures positions and
//! their protective orders converged with the venue.
//!
//! # Modules (leaf first)
//!
//! - **models**: positions, order enums, cooldowns, trade records, signals
//! - **gateway**: venue port, snapshot types, paper venue
//! - **broker**: retry policy, clock sync, resilient gateway decorator
//! - **store**: position store port, atomic JSON file store, write-through book
//! - **execution**: lifecycle, locks, cooldowns, engine, protection, fill
//!   watcher, reconciliation, scheduler
//! - **notify**: trade notifications (Telegram, log)
//! - **config**, **observability**, **telemetry**: ambient setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod observability;
pub mod store;
pub mod telemetry;

pub use error::ExecutionError;
pub use execution::{
    EngineConfig, EngineDeps, EntryOutcome, EntryRequest, ExecutionEngine, ReconcileTrigger,
    Reconciler, Scheduler,
};
pub use gateway::{ExchangeGateway, GatewayError, PaperExchange};
pub use models::{PosKey, Position, PositionSide, PositionStatus};
pub use store::{JsonFileStore, PositionBook, PositionStore};
