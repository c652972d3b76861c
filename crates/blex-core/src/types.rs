//! Shared data types.

use serde::{Deserialize, Serialize};

/// The part of a platform user the notification pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub username: String,
    /// Linked Telegram chat id; `None` when the user never connected the bot.
    #[serde(default)]
    pub telegram_id: Option<String>,
}

impl Recipient {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            telegram_id: None,
        }
    }

    pub fn with_telegram(mut self, chat_id: &str) -> Self {
        self.telegram_id = Some(chat_id.to_string());
        self
    }

    /// Telegram chat id, ignoring blank values left behind by an unlink.
    pub fn telegram_chat(&self) -> Option<&str> {
        self.telegram_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}
