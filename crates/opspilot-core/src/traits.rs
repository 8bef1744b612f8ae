//! Trait seams the pipeline is assembled from. External collaborators
//! (reasoning engine, channel transports, trigger source) are injected
//! through these so the core can be tested with in-process fakes.

use async_trait::async_trait;
use chrono::Duration;

use crate::error::Result;
use crate::types::TriggerEvent;

/// The reasoning engine that turns a prompt into free text.
///
/// Failure surfaces as an error, never as a partial response. When
/// `continuity` is true and a session id is supplied, the engine must treat
/// the invocation as part of one logical conversation per session.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        continuity: bool,
    ) -> Result<String>;
}

/// One external delivery transport (chat, message, mail).
///
/// `send` must be safe to call at most once per action per execution — the
/// dispatcher guarantees the "at most once per run" property; the channel
/// need not deduplicate.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, content: &str) -> Result<()>;
}

/// The calendar-like source of fireable events.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    fn name(&self) -> &str;

    /// Events firing within `lookahead` from now (inclusive of events whose
    /// fire time has already passed).
    async fn upcoming(&self, lookahead: Duration) -> Result<Vec<TriggerEvent>>;
}
