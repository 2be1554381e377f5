// =============================================================================
// Telegram Bot API sink — `sendMessage`
// =============================================================================
//
// SECURITY: The bot token is part of the request path and is never logged or
// serialized.  reqwest errors carry the request URL, so it is stripped before
// an error leaves this module.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::notify::AlertSink;
use crate::types::ParseMode;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Delivers alerts as chat messages through a Telegram bot.
#[derive(Clone)]
pub struct TelegramSink {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramSink {
    /// Create a sink for the bot identified by `token`.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client for Telegram")?;

        debug!(base_url = DEFAULT_BASE_URL, "TelegramSink initialised");

        Ok(Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the sink at another Bot API server (self-hosted or test double).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

/// JSON body of a `sendMessage` call.
fn message_payload(chat_id: &str, text: &str, parse_mode: ParseMode) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });
    if parse_mode == ParseMode::Markdown {
        body["parse_mode"] = serde_json::Value::from("Markdown");
    }
    body
}

#[async_trait]
impl AlertSink for TelegramSink {
    #[instrument(skip(self, text), name = "telegram::send_message")]
    async fn send(&self, subscriber: &str, text: &str, parse_mode: ParseMode) -> Result<()> {
        let resp = self
            .client
            .post(self.send_message_url())
            .json(&message_payload(subscriber, text, parse_mode))
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("POST sendMessage request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("failed to parse sendMessage response")?;

        if !status.is_success() || body["ok"].as_bool() != Some(true) {
            anyhow::bail!(
                "Telegram sendMessage returned {}: {}",
                status,
                body["description"].as_str().unwrap_or("no description")
            );
        }

        debug!(chat_id = subscriber, "alert delivered");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
