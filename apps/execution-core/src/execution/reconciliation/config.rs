//! Reconciliation configuration.

use std::time::Duration;

use rust_decimal::Decimal;

/// Configuration for reconciliation behavior.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Run one pass before the scheduler starts.
    pub on_startup: bool,
    /// Periodic pass interval.
    pub interval: Duration,
    /// FILLED records touched more recently than this are not treated as
    /// ghosts; the venue may not report a fresh fill yet.
    pub ghost_grace_period: chrono::Duration,
    /// Protective order size may differ from the position by this much and
    /// still be adopted.
    pub quantity_tolerance: Decimal,
    /// Create protective orders that are still missing after adoption.
    pub auto_create_protection: bool,
    /// Take unknown venue positions under management.
    pub adopt_orphans: bool,
    /// Timeframe used in the key of adopted positions.
    pub orphan_timeframe: String,
    /// Stop distance for adopted positions, as a fraction of entry.
    pub orphan_stop_loss_pct: Option<Decimal>,
    /// Take-profit distance for adopted positions, as a fraction of entry.
    pub orphan_take_profit_pct: Option<Decimal>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            interval: Duration::from_secs(60),
            ghost_grace_period: chrono::Duration::seconds(30),
            quantity_tolerance: Decimal::ZERO,
            auto_create_protection: true,
            adopt_orphans: true,
            orphan_timeframe: "1h".to_string(),
            orphan_stop_loss_pct: None,
            orphan_take_profit_pct: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ReconciliationConfig::default();

        assert!(config.on_startup);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.quantity_tolerance, Decimal::ZERO);
        assert!(config.auto_create_protection);
        assert!(config.adopt_orphans);
        assert!(config.orphan_stop_loss_pct.is_none());
    }
}
