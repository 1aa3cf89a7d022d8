//! Outbound notification channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::types::{HeadwatchError, HeadwatchResult};

pub const BOT_TOKEN_ENV: &str = "BOT_TOKEN";
pub const CHAT_ID_ENV: &str = "CHAT_ID";

const TELEGRAM_API: &str = "https://api.telegram.org";

/// A destination for HTML-formatted text messages.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one message. Failures are logged and reported as `false`.
    async fn send_text(&self, markup: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage`.
#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> HeadwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            bot_token: bot_token.filter(|t| !t.trim().is_empty()),
            chat_id: chat_id.filter(|c| !c.trim().is_empty()),
        })
    }

    /// Channel configured from `BOT_TOKEN` and `CHAT_ID`.
    pub fn from_env() -> HeadwatchResult<Self> {
        let token = std::env::var(BOT_TOKEN_ENV).ok();
        let chat = std::env::var(CHAT_ID_ENV).ok();
        if token.is_none() {
            warn!("{BOT_TOKEN_ENV} is not set");
        }
        if chat.is_none() {
            warn!("{CHAT_ID_ENV} is not set");
        }
        Self::new(token, chat)
    }

    /// Point at a different API root (used by tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    async fn post(&self, token: &str, chat_id: &str, markup: &str) -> HeadwatchResult<()> {
        let url = format!("{}/bot{token}/sendMessage", self.api_base);
        let resp = self
            .client
            .post(url)
            .json(&json!({
                "chat_id": chat_id,
                "text": markup,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = resp.status();
        let reply: TelegramReply = resp.json().await.map_err(|e| {
            HeadwatchError::Notify(format!("unreadable reply (HTTP {}): {e}", status.as_u16()))
        })?;
        if reply.ok {
            Ok(())
        } else {
            Err(HeadwatchError::Notify(
                reply
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ))
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send_text(&self, markup: &str) -> bool {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            error!("Telegram channel is not configured ({BOT_TOKEN_ENV}/{CHAT_ID_ENV})");
            return false;
        };
        match self.post(token, chat_id, markup).await {
            Ok(()) => {
                info!("Message sent to Telegram");
                true
            }
            Err(e) => {
                error!("Telegram delivery failed: {e}");
                false
            }
        }
    }
}
