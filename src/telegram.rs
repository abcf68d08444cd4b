//! Telegram notification module
//! Thin wrapper over the Bot API sendMessage / editMessageText calls

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Notification port consumed by the signal engine.
///
/// Failures degrade to `None` / no-op; a dropped notification never blocks a
/// state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a new message; returns the message id for later edits.
    async fn send(&self, token: &str, chat_id: &str, text: &str) -> Option<i64>;

    /// Edit a previously sent message in place.
    async fn edit(&self, token: &str, chat_id: &str, message_id: i64, text: &str);
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    result: Option<SentMessage>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct EditMessageResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: TELEGRAM_API_URL.to_string(),
        }
    }

    async fn send_once(&self, token: &str, chat_id: &str, text: &str) -> Result<i64> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, token);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        let data: SendMessageResponse = response.json().await?;
        if !data.ok {
            return Err(anyhow!(
                "sendMessage rejected: {}",
                data.description.unwrap_or_default()
            ));
        }
        data.result
            .map(|m| m.message_id)
            .ok_or_else(|| anyhow!("sendMessage response missing result"))
    }

    async fn edit_once(
        &self,
        token: &str,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<()> {
        let url = format!("{}/bot{}/editMessageText", self.base_url, token);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
            }))
            .send()
            .await?;

        let data: EditMessageResponse = response.json().await?;
        if !data.ok {
            return Err(anyhow!(
                "editMessageText rejected: {}",
                data.description.unwrap_or_default()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, token: &str, chat_id: &str, text: &str) -> Option<i64> {
        match self.send_once(token, chat_id, text).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                eprintln!("[TELEGRAM] send to {} failed: {:#}", chat_id, e);
                None
            }
        }
    }

    async fn edit(&self, token: &str, chat_id: &str, message_id: i64, text: &str) {
        if let Err(e) = self.edit_once(token, chat_id, message_id, text).await {
            eprintln!(
                "[TELEGRAM] edit of message {} in {} failed: {:#}",
                message_id, chat_id, e
            );
        }
    }
}
