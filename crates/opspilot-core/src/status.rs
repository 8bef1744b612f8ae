//! Status broadcast hub — pushes task status transitions to subscribers and
//! keeps an attention ring buffer for tasks that need an operator.
//!
//! Push delivery to a disconnected subscriber is not guaranteed; late joiners
//! repair missed updates by pulling a full snapshot from the store.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{OpsPilotError, Result};
use crate::types::{StatusEvent, TaskStatus};

const ATTENTION_BUFFER: usize = 100;

/// An attention-worthy event raised to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionItem {
    pub task_id: String,
    pub title: String,
    /// "needs_review" or "needs_input".
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Observer/broadcast surface for task status changes.
pub struct StatusHub {
    tx: broadcast::Sender<StatusEvent>,
    /// Ring buffer of recent attention items, newest last.
    attention: Mutex<Vec<AttentionItem>>,
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            attention: Mutex::new(Vec::new()),
        }
    }

    /// Publish a status transition. Lagging or absent subscribers are fine.
    pub fn publish(&self, task_id: &str, status: TaskStatus) {
        let event = StatusEvent {
            task_id: task_id.to_string(),
            status,
            timestamp: Utc::now(),
        };
        tracing::debug!("Status: {} -> {}", task_id, status.as_str());
        let _ = self.tx.send(event);
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Flag a task as needing operator attention.
    pub fn raise_attention(&self, task_id: &str, title: &str, reason: &str) -> Result<()> {
        tracing::warn!("Task '{}' needs attention: {}", title, reason);
        let mut buf = self.lock_attention()?;
        buf.push(AttentionItem {
            task_id: task_id.to_string(),
            title: title.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        if buf.len() > ATTENTION_BUFFER {
            buf.remove(0);
        }
        Ok(())
    }

    /// Recent attention items, newest last.
    pub fn attention_items(&self) -> Result<Vec<AttentionItem>> {
        Ok(self.lock_attention()?.clone())
    }

    fn lock_attention(&self) -> Result<MutexGuard<'_, Vec<AttentionItem>>> {
        self.attention
            .lock()
            .map_err(|e| OpsPilotError::Other(format!("Attention lock poisoned: {e}")))
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}
