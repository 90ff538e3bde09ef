//! Reconciliation configuration for periodic venue state sync.

use serde::{Deserialize, Serialize};

use super::{ConfigError, default_true, fraction};

/// Reconciliation configuration for periodic venue state sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Run one pass before the scheduler starts.
    #[serde(default = "default_true")]
    pub on_startup: bool,
    /// Reconciliation interval in seconds.
    #[serde(default = "default_reconciliation_interval")]
    pub interval_secs: u64,
    /// Records updated more recently than this are never treated as ghosts.
    #[serde(default = "default_ghost_grace")]
    pub ghost_grace_secs: u64,
    /// Size difference allowed when adopting a venue protective order.
    #[serde(default)]
    pub quantity_tolerance: f64,
    /// Create protective orders still missing after adoption.
    #[serde(default = "default_true")]
    pub auto_create_protection: bool,
    /// Take unknown venue positions under management.
    #[serde(default = "default_true")]
    pub adopt_orphans: bool,
    /// Timeframe used in the key of adopted positions.
    #[serde(default = "default_orphan_timeframe")]
    pub orphan_timeframe: String,
    /// Stop distance for adopted positions.
    #[serde(default)]
    pub orphan_stop_loss_pct: Option<f64>,
    /// Take-profit distance for adopted positions.
    #[serde(default)]
    pub orphan_take_profit_pct: Option<f64>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            interval_secs: default_reconciliation_interval(),
            ghost_grace_secs: default_ghost_grace(),
            quantity_tolerance: 0.0,
            auto_create_protection: true,
            adopt_orphans: true,
            orphan_timeframe: default_orphan_timeframe(),
            orphan_stop_loss_pct: None,
            orphan_take_profit_pct: None,
        }
    }
}

const fn default_reconciliation_interval() -> u64 {
    60
}

const fn default_ghost_grace() -> u64 {
    30
}

fn default_orphan_timeframe() -> String {
    "1h".to_string()
}

impl ReconciliationConfig {
    /// Convert to the internal `ReconciliationConfig` type used by the reconciliation module.
    ///
    /// # Errors
    ///
    /// Returns an error if a fraction cannot be represented as a decimal.
    pub fn to_reconciliation_config(
        &self,
    ) -> Result<crate::execution::ReconciliationConfig, ConfigError> {
        #[allow(clippy::cast_possible_wrap)] // validated to fit
        let grace = chrono::Duration::seconds(self.ghost_grace_secs as i64);

        Ok(crate::execution::ReconciliationConfig {
            on_startup: self.on_startup,
            interval: std::time::Duration::from_secs(self.interval_secs),
            ghost_grace_period: grace,
            quantity_tolerance: fraction("quantity_tolerance", self.quantity_tolerance)?,
            auto_create_protection: self.auto_create_protection,
            adopt_orphans: self.adopt_orphans,
            orphan_timeframe: self.orphan_timeframe.clone(),
            orphan_stop_loss_pct: self
                .orphan_stop_loss_pct
                .map(|v| fraction("orphan_stop_loss_pct", v))
                .transpose()?,
            orphan_take_profit_pct: self
                .orphan_take_profit_pct
                .map(|v| fraction("orphan_take_profit_pct", v))
                .transpose()?,
        })
    }
}
