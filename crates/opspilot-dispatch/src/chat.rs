//! Chat channel — Telegram-style bot API sending. The recipient is the
//! chat id.

use async_trait::async_trait;
use serde::Deserialize;

use opspilot_core::config::ChatChannelConfig;
use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::DeliveryChannel;

pub struct ChatChannel {
    config: ChatChannelConfig,
    client: reqwest::Client,
}

impl ChatChannel {
    pub fn new(config: ChatChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

#[async_trait]
impl DeliveryChannel for ChatChannel {
    fn name(&self) -> &str {
        "chat"
    }

    async fn send(&self, recipient: &str, content: &str) -> Result<()> {
        if recipient.is_empty() {
            return Err(OpsPilotError::Channel("chat: missing chat id".into()));
        }
        let body = serde_json::json!({
            "chat_id": recipient,
            "text": content,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| OpsPilotError::Channel(format!("chat sendMessage failed: {e}")))?;

        let result: BotApiResponse = response
            .json()
            .await
            .map_err(|e| OpsPilotError::Channel(format!("Invalid chat response: {e}")))?;

        if !result.ok {
            return Err(OpsPilotError::Channel(format!(
                "chat send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}
