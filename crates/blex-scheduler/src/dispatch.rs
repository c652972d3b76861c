//! Outbound message delivery.
//!
//! `MessageSender` is the seam the notifier talks to; `TelegramSender` is the
//! production implementation over the Bot API `sendMessage` method.

use async_trait::async_trait;
use blex_core::config::TelegramConfig;
use blex_core::error::{BlexError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Something that can push a text message to a chat.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}

/// Telegram Bot API client.
pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    timeout: Duration,
}

impl TelegramSender {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Build a sender only when the config is enabled and has a token.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        config.is_usable().then(|| Self::new(config))
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Send a text message.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&send_message_body(chat_id, text))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BlexError::Channel(format!("sendMessage failed: {e}")))?;

        let status = response.status();
        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| BlexError::Channel(format!("Invalid send response ({status}): {e}")))?;

        result.into_result().map(|_| {
            tracing::debug!("Telegram message sent to chat {chat_id}");
        })
    }

    /// Get bot info. Used as a connectivity check.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BlexError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| BlexError::Channel(format!("Invalid getMe response: {e}")))?;
        body.into_result()
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

fn send_message_body(chat_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "chat_id": chat_id,
        "text": text,
        "disable_web_page_preview": true,
    })
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.ok {
            return Err(BlexError::Channel(format!(
                "Telegram API error: {}",
                self.description.unwrap_or_default()
            )));
        }
        self.result
            .ok_or_else(|| BlexError::Channel("Telegram API returned no result".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}
