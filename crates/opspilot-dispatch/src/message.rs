//! Message channel — generic JSON webhook POST. The recipient is forwarded
//! in the payload for the receiving side to route on.

use async_trait::async_trait;

use opspilot_core::config::MessageChannelConfig;
use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::DeliveryChannel;

pub struct MessageChannel {
    config: MessageChannelConfig,
    client: reqwest::Client,
}

impl MessageChannel {
    pub fn new(config: MessageChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for MessageChannel {
    fn name(&self) -> &str {
        "message"
    }

    async fn send(&self, recipient: &str, content: &str) -> Result<()> {
        let mut req = self
            .client
            .post(&self.config.url)
            .json(&serde_json::json!({
                "recipient": recipient,
                "content": content,
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in &self.config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| OpsPilotError::Channel(format!("message send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(OpsPilotError::Channel(format!("message webhook error {status}")));
        }
        Ok(())
    }
}
