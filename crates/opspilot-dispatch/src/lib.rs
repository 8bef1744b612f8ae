//! # OpsPilot Dispatch
//!
//! Sends validated deliverables to external channels. Exactly one send
//! attempt per action per execution; each action's status is independent of
//! its siblings; no automatic retry. Content is transmitted byte-for-byte —
//! the dispatcher never re-derives or reformats what the validator passed.

pub mod chat;
pub mod mail;
pub mod message;

pub use chat::ChatChannel;
pub use mail::MailChannel;
pub use message::MessageChannel;

use std::collections::HashMap;
use std::sync::Arc;

use opspilot_core::config::ChannelsConfig;
use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::DeliveryChannel;
use opspilot_core::types::{DeliveryAction, DeliveryStatus};

/// Registry of named delivery channels.
pub struct Dispatcher {
    channels: HashMap<String, Arc<dyn DeliveryChannel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Build a dispatcher from the configured channels.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut dispatcher = Self::new();
        if let Some(chat) = &config.chat {
            if chat.enabled {
                dispatcher.register(Arc::new(ChatChannel::new(chat.clone())));
            }
        }
        if let Some(message) = &config.message {
            if message.enabled {
                dispatcher.register(Arc::new(MessageChannel::new(message.clone())));
            }
        }
        if let Some(mail) = &config.mail {
            if mail.enabled {
                dispatcher.register(Arc::new(MailChannel::new(mail.clone())));
            }
        }
        dispatcher
    }

    pub fn register(&mut self, channel: Arc<dyn DeliveryChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send every pending action exactly once. Statuses are updated in
    /// place; one channel's failure never blocks the others. Returns true
    /// when all attempted actions completed.
    pub async fn dispatch(&self, actions: &mut [DeliveryAction]) -> bool {
        let mut all_ok = true;
        for action in actions.iter_mut().filter(|a| a.status == DeliveryStatus::Pending) {
            match self.send_action(action).await {
                Ok(()) => {
                    tracing::info!("Delivered via {} to {:?}", action.channel, action.recipient);
                    action.status = DeliveryStatus::Completed;
                }
                Err(e) => {
                    tracing::warn!("Delivery via {} failed: {e}", action.channel);
                    action.status = DeliveryStatus::Failed;
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    async fn send_action(&self, action: &DeliveryAction) -> Result<()> {
        let channel = self
            .channels
            .get(&action.channel)
            .ok_or_else(|| OpsPilotError::Channel(format!("Unknown channel: {}", action.channel)))?;
        let content = action
            .content
            .as_deref()
            .ok_or_else(|| OpsPilotError::Channel("Action has no content".into()))?;
        channel
            .send(action.recipient.as_deref().unwrap_or_default(), content)
            .await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
