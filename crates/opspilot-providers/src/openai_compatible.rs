//! OpenAI-compatible HTTP engine with per-session continuity.
//!
//! Continuity is a single logical conversation per session id: when enabled,
//! prior turns for the session are replayed as chat history. The pipeline
//! runs one invocation at a time, so the history map sees no concurrent
//! writers for the same session.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use opspilot_core::config::LlmConfig;
use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::ReasoningEngine;

/// Keep at most this many prior turns per session when replaying history.
const SESSION_HISTORY_LIMIT: usize = 20;

pub struct HttpEngine {
    config: LlmConfig,
    client: reqwest::Client,
    /// session_id → prior (role, content) turns.
    sessions: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl HttpEngine {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn build_messages(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        continuity: bool,
    ) -> Result<Vec<serde_json::Value>> {
        let mut messages = Vec::new();
        if continuity {
            if let Some(sid) = session_id {
                let sessions = self.lock_sessions()?;
                if let Some(history) = sessions.get(sid) {
                    for (role, content) in history {
                        messages.push(serde_json::json!({"role": role, "content": content}));
                    }
                }
            }
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));
        Ok(messages)
    }

    fn record_turn(&self, session_id: &str, prompt: &str, response: &str) -> Result<()> {
        let mut sessions = self.lock_sessions()?;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push(("user".into(), prompt.to_string()));
        history.push(("assistant".into(), response.to_string()));
        if history.len() > SESSION_HISTORY_LIMIT {
            let drop = history.len() - SESSION_HISTORY_LIMIT;
            history.drain(..drop);
        }
        Ok(())
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<(String, String)>>>> {
        self.sessions
            .lock()
            .map_err(|e| OpsPilotError::Provider(format!("Session lock poisoned: {e}")))
    }
}

#[async_trait]
impl ReasoningEngine for HttpEngine {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn invoke(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        continuity: bool,
    ) -> Result<String> {
        let messages = self.build_messages(prompt, session_id, continuity)?;
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let resp = req
            .timeout(std::time::Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| OpsPilotError::Provider(format!("Engine request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsPilotError::Provider(format!(
                "Engine error {status}: {text}"
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OpsPilotError::Provider(format!("Invalid engine response: {e}")))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OpsPilotError::Provider("Engine returned no content".into()))?
            .to_string();

        if continuity {
            if let Some(sid) = session_id {
                self.record_turn(sid, prompt, &content)?;
            }
        }

        tracing::debug!(
            "Engine response: {} chars (session: {:?})",
            content.len(),
            session_id
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_replayed_only_with_continuity() {
        let engine = HttpEngine::new(&LlmConfig::default());
        engine.record_turn("s1", "hello", "hi").unwrap();

        let with = engine.build_messages("next", Some("s1"), true).unwrap();
        assert_eq!(with.len(), 3);
        assert_eq!(with[0]["content"], "hello");

        let without = engine.build_messages("next", Some("s1"), false).unwrap();
        assert_eq!(without.len(), 1);

        let other_session = engine.build_messages("next", Some("s2"), true).unwrap();
        assert_eq!(other_session.len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let engine = HttpEngine::new(&LlmConfig::default());
        for i in 0..30 {
            engine
                .record_turn("s1", &format!("q{i}"), &format!("a{i}"))
                .unwrap();
        }
        let messages = engine.build_messages("next", Some("s1"), true).unwrap();
        assert_eq!(messages.len(), SESSION_HISTORY_LIMIT + 1);
    }
}
