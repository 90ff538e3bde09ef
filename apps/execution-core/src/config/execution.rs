//! Entry, protection and cooldown configuration.

use serde::{Deserialize, Serialize};

use crate::models::MarginMode;

/// Entry sizing and order handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Quote notional per entry.
    #[serde(default = "default_order_notional")]
    pub order_notional: f64,
    /// Leverage set before each entry.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Margin mode set before each entry.
    #[serde(default)]
    pub margin_mode: MarginMode,
    /// Signals below this confidence are ignored.
    #[serde(default)]
    pub min_confidence: f64,
    /// Fill watcher polling period in seconds.
    #[serde(default = "default_fill_poll_interval")]
    pub fill_poll_interval_secs: u64,
    /// Pending entries older than this are cancelled.
    #[serde(default = "default_pending_order_ttl")]
    pub pending_order_ttl_secs: u64,
    /// Deadline for each notification in milliseconds.
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_notional: default_order_notional(),
            leverage: default_leverage(),
            margin_mode: MarginMode::default(),
            min_confidence: 0.0,
            fill_poll_interval_secs: default_fill_poll_interval(),
            pending_order_ttl_secs: default_pending_order_ttl(),
            notify_timeout_ms: default_notify_timeout(),
        }
    }
}

/// Protective order levels and tolerances. Fractions: `0.02` = 2%.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Stop distance applied when a signal carries none.
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: Option<f64>,
    /// Take-profit distance applied when a signal carries none.
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: Option<f64>,
    /// Take-profit counts as reached this far short of the level.
    #[serde(default = "default_tolerance")]
    pub take_profit_tolerance_pct: f64,
    /// Exits this close to the stop count as losses.
    #[serde(default = "default_tolerance")]
    pub loss_tolerance_pct: f64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            default_stop_loss_pct: default_stop_loss_pct(),
            default_take_profit_pct: default_take_profit_pct(),
            take_profit_tolerance_pct: default_tolerance(),
            loss_tolerance_pct: default_tolerance(),
        }
    }
}

/// Re-entry suppression after losing exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Cooldown length in seconds.
    #[serde(default = "default_cooldown")]
    pub duration_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_cooldown(),
        }
    }
}

const fn default_order_notional() -> f64 {
    100.0
}

const fn default_leverage() -> u32 {
    1
}

const fn default_fill_poll_interval() -> u64 {
    5
}

const fn default_pending_order_ttl() -> u64 {
    14_400 // 4 hours
}

const fn default_notify_timeout() -> u64 {
    5_000
}

#[allow(clippy::unnecessary_wraps)] // serde default must match the field type
const fn default_stop_loss_pct() -> Option<f64> {
    Some(0.02)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_take_profit_pct() -> Option<f64> {
    Some(0.04)
}

const fn default_tolerance() -> f64 {
    0.001
}

const fn default_cooldown() -> u64 {
    1_800 // 30 minutes
}
