//! State persistence configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::BookConfig;

/// State persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root directory; each account gets a subdirectory.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Attempts per store write, including the first.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// Pause between write attempts in milliseconds.
    #[serde(default = "default_write_backoff")]
    pub write_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            write_attempts: default_write_attempts(),
            write_backoff_ms: default_write_backoff(),
        }
    }
}

impl PersistenceConfig {
    /// State directory of one account.
    #[must_use]
    pub fn profile_dir(&self, account: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(account)
    }

    /// Convert to the position book retry settings.
    #[must_use]
    pub const fn to_book_config(&self) -> BookConfig {
        BookConfig {
            write_attempts: self.write_attempts,
            write_backoff: Duration::from_millis(self.write_backoff_ms),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

const fn default_write_attempts() -> u32 {
    3
}

const fn default_write_backoff() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dir() {
        let config = PersistenceConfig::default();
        assert_eq!(config.profile_dir("main"), PathBuf::from("./data/main"));
    }
}
