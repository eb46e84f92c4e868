//! Telegram Bot API client
//!
//! Only `sendMessage` is used. Server errors and rate limits come back as
//! [`Error::Http`] so the notifier retries them; other rejections are final.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Longest response body kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Telegram bot client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramClient {
    /// Create a new client
    pub fn new(api_base: &str, bot_token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
            chat_id,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Push a message to the configured chat
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Telegram request failed: {}", e.without_url())))?;

        let status = response.status();
        if status.is_success() {
            debug!("Telegram message delivered ({} chars)", text.chars().count());
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::Http(format!("Telegram returned {}: {}", status, body)))
        } else {
            Err(Error::Alert(format!("Telegram returned {}: {}", status, body)))
        }
    }
}
