//! # OpsPilot Providers
//!
//! Reasoning-engine implementations. Any OpenAI-compatible chat-completions
//! endpoint (OpenAI, Ollama, llama.cpp server, OpenRouter, proxies) is
//! handled by the single `HttpEngine`.

pub mod openai_compatible;

pub use openai_compatible::HttpEngine;

use opspilot_core::config::OpsPilotConfig;
use opspilot_core::error::Result;
use opspilot_core::traits::ReasoningEngine;

/// Create the configured reasoning engine.
pub fn create_engine(config: &OpsPilotConfig) -> Result<Box<dyn ReasoningEngine>> {
    Ok(Box::new(HttpEngine::new(&config.llm)))
}
