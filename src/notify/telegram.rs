// src/notify/telegram.rs
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Notification, Notifier};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Bot API `sendMessage` to a single chat.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        Self::with_base_url(token, chat_id, TELEGRAM_API)
    }

    pub fn with_base_url(token: String, chat_id: String, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            token,
            chat_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: &notification.message,
            disable_web_page_preview: true,
        };

        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("telegram request failed")?
            .error_for_status()
            .context("telegram rejected message")?;

        debug!(kind = notification.kind.as_str(), "telegram message sent");
        Ok(())
    }
}
