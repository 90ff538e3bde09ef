//! Evaluation scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which symbol/timeframe slots to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Venue symbols.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Strategy timeframes.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,
    /// Seconds between evaluations of one slot.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: default_timeframes(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

impl SchedulerConfig {
    /// Convert to the internal scheduler settings.
    #[must_use]
    pub fn to_scheduler_config(&self) -> crate::execution::SchedulerConfig {
        crate::execution::SchedulerConfig {
            symbols: self.symbols.clone(),
            timeframes: self.timeframes.clone(),
            tick_interval: Duration::from_secs(self.tick_interval_secs),
        }
    }
}

fn default_timeframes() -> Vec<String> {
    vec!["15m".to_string()]
}

const fn default_tick_interval() -> u64 {
    30
}
