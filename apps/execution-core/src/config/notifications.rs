//! Notification sink configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::notify::{LogNotifier, NotificationSink, TelegramNotifier};

/// Notification sinks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsConfig {
    /// Telegram bot settings.
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Send events to Telegram instead of the log.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token, usually `${TELEGRAM_BOT_TOKEN}`.
    #[serde(default)]
    pub bot_token: String,
    /// Target chat id.
    #[serde(default)]
    pub chat_id: String,
    /// API host override.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl NotificationsConfig {
    /// Build the configured sink. Falls back to the log.
    #[must_use]
    pub fn build_sink(&self) -> Arc<dyn NotificationSink> {
        let telegram = &self.telegram;
        if !telegram.enabled {
            return Arc::new(LogNotifier);
        }
        let notifier = TelegramNotifier::new(&telegram.bot_token, &telegram.chat_id);
        match &telegram.base_url {
            Some(url) => Arc::new(notifier.with_base_url(url)),
            None => Arc::new(notifier),
        }
    }
}
