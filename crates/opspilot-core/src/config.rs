//! OpsPilot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpsPilotConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl OpsPilotConfig {
    /// Load config from the default path (~/.opspilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::OpsPilotError::Config(format!("Failed to read config: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::OpsPilotError::Config(format!("Failed to parse config: {e}"))
        })?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::OpsPilotError::Config(format!("Failed to serialize config: {e}"))
        })?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the OpsPilot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opspilot")
    }
}

/// Reasoning engine (LLM) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Scheduler poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Look-ahead window in minutes.
    #[serde(default = "default_lookahead")]
    pub lookahead_minutes: u64,
    /// How many prior runs of a recurrence feed the prompt context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_lookahead() -> u64 {
    5
}
fn default_history_window() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookahead_minutes: default_lookahead(),
            history_window: default_history_window(),
        }
    }
}

/// Gateway (HTTP/WebSocket) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7700
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Empty means ~/.opspilot/opspilot.db.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            OpsPilotConfig::home_dir().join("opspilot.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// Delivery channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub chat: Option<ChatChannelConfig>,
    #[serde(default)]
    pub message: Option<MessageChannelConfig>,
    #[serde(default)]
    pub mail: Option<MailChannelConfig>,
}

/// Chat channel (Telegram-style bot API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChannelConfig {
    pub bot_token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Message channel (generic JSON webhook POST).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageChannelConfig {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Mail channel (SMTP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailChannelConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub from_address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
fn default_smtp_port() -> u16 {
    587
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OpsPilotConfig::default();
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.scheduler.lookahead_minutes, 5);
        assert_eq!(config.scheduler.history_window, 10);
        assert_eq!(config.gateway.port, 7700);
        assert!(config.channels.chat.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [scheduler]
            poll_interval_secs = 5

            [channels.chat]
            bot_token = "tok"
        "#;
        let config: OpsPilotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.lookahead_minutes, 5);
        let chat = config.channels.chat.unwrap();
        assert_eq!(chat.bot_token, "tok");
        assert!(chat.enabled);
    }
}
