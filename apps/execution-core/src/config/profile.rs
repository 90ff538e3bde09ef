//! Account profile configuration.

use serde::{Deserialize, Serialize};

/// Which account this process manages and against which venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Account name. First component of every position key and the name of
    /// the state directory.
    #[serde(default = "default_account")]
    pub account: String,
    /// Venue adapter name.
    #[serde(default = "default_venue")]
    pub venue: String,
    /// Trading mode: PAPER or LIVE.
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            venue: default_venue(),
            mode: default_mode(),
        }
    }
}

impl ProfileConfig {
    /// Check if running against real funds.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.mode.eq_ignore_ascii_case("LIVE")
    }
}

fn default_account() -> String {
    "main".to_string()
}

fn default_venue() -> String {
    "paper".to_string()
}

fn default_mode() -> String {
    "PAPER".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = ProfileConfig::default();
        assert_eq!(profile.account, "main");
        assert_eq!(profile.venue, "paper");
        assert!(!profile.is_live());
    }
}
