//! Configuration module for the execution engine.
//!
//! Loads YAML with environment variable interpolation, validates it, and
//! converts each section into the settings type of the component it
//! configures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! let engine = config.engine_config()?;
//! ```

mod execution;
mod notifications;
mod observability;
mod persistence;
mod profile;
mod reconciliation;
mod retry;
mod scheduler;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use execution::{CooldownConfig, ExecutionConfig, ProtectionConfig};
pub use notifications::{NotificationsConfig, TelegramConfig};
pub use observability::{LoggingConfig, MetricsExporterConfig, ObservabilityConfig};
pub use persistence::PersistenceConfig;
pub use profile::ProfileConfig;
pub use reconciliation::ReconciliationConfig;
pub use retry::{ClockSyncConfig, RetryConfig};
pub use scheduler::SchedulerConfig;

use crate::execution::EngineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Account profile.
    #[serde(default)]
    pub profile: ProfileConfig,
    /// Entry sizing and order handling.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Protective order levels and tolerances.
    #[serde(default)]
    pub protection: ProtectionConfig,
    /// Reconciliation configuration for periodic venue sync.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Re-entry cooldowns.
    #[serde(default)]
    pub cooldown: CooldownConfig,
    /// Venue call retries and clock sync.
    #[serde(default)]
    pub retry: RetryConfig,
    /// State persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Notification sinks.
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Evaluation loops.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build the engine settings from the profile, execution, protection
    /// and cooldown sections.
    ///
    /// # Errors
    ///
    /// Returns an error if a fraction cannot be represented as a decimal.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let execution = &self.execution;
        let protection = &self.protection;

        #[allow(clippy::cast_possible_wrap)] // validated to fit
        let (cooldown, ttl) = (
            chrono::Duration::seconds(self.cooldown.duration_secs as i64),
            chrono::Duration::seconds(execution.pending_order_ttl_secs as i64),
        );

        Ok(EngineConfig {
            account: self.profile.account.clone(),
            order_notional: fraction("execution.order_notional", execution.order_notional)?,
            leverage: execution.leverage,
            margin_mode: execution.margin_mode,
            default_stop_loss_pct: protection
                .default_stop_loss_pct
                .map(|v| fraction("protection.default_stop_loss_pct", v))
                .transpose()?,
            default_take_profit_pct: protection
                .default_take_profit_pct
                .map(|v| fraction("protection.default_take_profit_pct", v))
                .transpose()?,
            min_confidence: execution.min_confidence,
            take_profit_tolerance_pct: fraction(
                "protection.take_profit_tolerance_pct",
                protection.take_profit_tolerance_pct,
            )?,
            loss_tolerance_pct: fraction(
                "protection.loss_tolerance_pct",
                protection.loss_tolerance_pct,
            )?,
            cooldown,
            fill_poll_interval: std::time::Duration::from_secs(execution.fill_poll_interval_secs),
            pending_order_ttl: ttl,
            notify_timeout: std::time::Duration::from_millis(execution.notify_timeout_ms),
        })
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    let valid_modes = ["PAPER", "LIVE"];
    if !valid_modes.contains(&config.profile.mode.to_uppercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "profile.mode must be one of: {valid_modes:?}"
        )));
    }
    if config.profile.account.is_empty() || config.profile.account.contains(['/', '\\']) {
        return invalid("profile.account must be a non-empty name without path separators");
    }

    let execution = &config.execution;
    if !(execution.order_notional.is_finite() && execution.order_notional > 0.0) {
        return invalid("execution.order_notional must be positive");
    }
    if execution.leverage == 0 {
        return invalid("execution.leverage must be at least 1");
    }
    if !(0.0..=1.0).contains(&execution.min_confidence) {
        return invalid("execution.min_confidence must be between 0.0 and 1.0");
    }
    if execution.fill_poll_interval_secs == 0 {
        return invalid("execution.fill_poll_interval_secs must be positive");
    }

    let protection = &config.protection;
    for (name, value) in [
        ("protection.default_stop_loss_pct", protection.default_stop_loss_pct),
        ("protection.default_take_profit_pct", protection.default_take_profit_pct),
        ("reconciliation.orphan_stop_loss_pct", config.reconciliation.orphan_stop_loss_pct),
        ("reconciliation.orphan_take_profit_pct", config.reconciliation.orphan_take_profit_pct),
    ] {
        if let Some(v) = value {
            if !(v > 0.0 && v < 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0 (exclusive)"
                )));
            }
        }
    }
    for (name, value) in [
        ("protection.take_profit_tolerance_pct", protection.take_profit_tolerance_pct),
        ("protection.loss_tolerance_pct", protection.loss_tolerance_pct),
        ("reconciliation.quantity_tolerance", config.reconciliation.quantity_tolerance),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be non-negative"
            )));
        }
    }

    if config.reconciliation.interval_secs == 0 {
        return invalid("reconciliation.interval_secs must be positive");
    }
    let max_secs = u64::try_from(i64::MAX / 1000).unwrap_or(u64::MAX);
    if config.reconciliation.ghost_grace_secs > max_secs
        || config.cooldown.duration_secs > max_secs
        || execution.pending_order_ttl_secs > max_secs
    {
        return invalid("durations are out of range");
    }

    let retry = &config.retry;
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return invalid("retry.jitter_factor must be between 0.0 and 1.0");
    }
    if retry.backoff_multiplier < 1.0 {
        return invalid("retry.backoff_multiplier must be at least 1.0");
    }
    if retry.call_timeout_ms == 0 {
        return invalid("retry.call_timeout_ms must be positive");
    }

    if config.persistence.write_attempts == 0 {
        return invalid("persistence.write_attempts must be at least 1");
    }

    let telegram = &config.notifications.telegram;
    if telegram.enabled && (telegram.bot_token.is_empty() || telegram.chat_id.is_empty()) {
        return invalid("notifications.telegram requires bot_token and chat_id when enabled");
    }

    if config.scheduler.tick_interval_secs == 0 {
        return invalid("scheduler.tick_interval_secs must be positive");
    }

    Ok(())
}

/// Decimal from a configured float.
fn fraction(name: &str, value: f64) -> Result<Decimal, ConfigError> {
    Decimal::from_f64(value)
        .map(|d| d.normalize())
        .ok_or_else(|| ConfigError::ValidationError(format!("{name}: {value} is not a finite number")))
}

const fn default_true() -> bool {
    true
}
