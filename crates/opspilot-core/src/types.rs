//! Task definitions — the core data model for the execution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of declared work with a lifecycle, optional schedule, and optional
/// delivery obligations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Scheduled (has a fire time) or immediate.
    pub task_type: TaskType,
    /// Where the task came from.
    pub source_type: SourceType,
    /// Opaque pointer into the source (e.g. trigger event UID).
    pub source_ref: Option<String>,
    /// Human-readable title.
    pub title: String,
    /// Free-text intent for the reasoning engine.
    pub instructions: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Opaque continuity token for the reasoning engine.
    pub session_id: Option<String>,
    /// Groups occurrences of one recurring schedule. All tasks sharing a
    /// recurrence_id share the same session_id.
    pub recurrence_id: Option<String>,
    /// Occurrence key within a recurrence (opaque, matches the ledger key).
    pub occurrence_date: Option<String>,
    /// Fire time for scheduled tasks; absent for immediate ones.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on soft delete; a task with this set never appears in default listings.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: CreatedBy,
    /// Internal progress records — never shown externally.
    #[serde(default)]
    pub work: Vec<WorkItem>,
    /// Delivery obligations, one per channel send.
    #[serde(default)]
    pub delivery: Vec<DeliveryAction>,
}

/// Task kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Scheduled,
    Immediate,
}

/// What produced the task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ExternalTrigger,
    Conversation,
    Webhook,
    Manual,
}

/// Who created the task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    Scheduler,
    User,
    Agent,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NeedsReview,
    Paused,
    Deleted,
}

impl TaskStatus {
    /// Terminal statuses cannot transition further, with one exception:
    /// `needs_review` may be promoted to completed or failed by an operator.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deleted)
    }

    /// Whether a transition to `next` is allowed. Transitions are monotone
    /// except for manual resolution of `needs_review`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::NeedsReview) => true,
            (Self::NeedsReview, Self::Completed | Self::Failed) => true,
            (Self::Pending | Self::Paused, Self::Paused | Self::Pending) => true,
            (_, Self::Deleted) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NeedsReview => "needs_review",
            Self::Paused => "paused",
            Self::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "needs_review" => Ok(Self::NeedsReview),
            "paused" => Ok(Self::Paused),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// An internal, non-delivered progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub description: String,
    pub status: WorkItemStatus,
}

impl WorkItem {
    pub fn pending(description: &str) -> Self {
        Self {
            description: description.to_string(),
            status: WorkItemStatus::Pending,
        }
    }

    pub fn done(description: &str) -> Self {
        Self {
            description: description.to_string(),
            status: WorkItemStatus::Done,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Done,
    Failed,
}

/// One obligation to reach one channel with one piece of content.
/// Status is independent of sibling actions and of the parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAction {
    /// Channel name (chat, message, mail).
    pub channel: String,
    pub recipient: Option<String>,
    /// Pre-set content is delivered verbatim, bypassing the reasoning engine.
    pub content: Option<String>,
    #[serde(default)]
    pub status: DeliveryStatus,
}

impl DeliveryAction {
    pub fn new(channel: &str, recipient: Option<&str>) -> Self {
        Self {
            channel: channel.to_string(),
            recipient: recipient.map(String::from),
            content: None,
            status: DeliveryStatus::Pending,
        }
    }

    pub fn with_content(channel: &str, recipient: Option<&str>, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            recipient: recipient.map(String::from),
            content: Some(content.to_string()),
            status: DeliveryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    NeedsReview,
}

/// Soft many-to-many association between a task and a conversation.
/// Created only on write operations; orphans are tolerated and filtered
/// at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLink {
    pub task_id: String,
    pub conversation_id: String,
    pub linked_at: DateTime<Utc>,
}

/// A status transition event pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

/// A fireable event from the external trigger source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Stable event UID.
    pub uid: String,
    pub title: String,
    pub instructions: String,
    /// When the event fires.
    pub fire_at: DateTime<Utc>,
    /// Occurrence key — distinguishes occurrences of a recurring event.
    pub occurrence: String,
    pub recurring: bool,
    /// Delivery obligations declared on the event, if any.
    #[serde(default)]
    pub delivery: Vec<DeliveryAction>,
}

impl Task {
    /// Create a new immediate task.
    pub fn immediate(title: &str, instructions: &str, created_by: CreatedBy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: TaskType::Immediate,
            source_type: SourceType::Manual,
            source_ref: None,
            title: title.to_string(),
            instructions: instructions.to_string(),
            status: TaskStatus::Pending,
            session_id: Some(uuid::Uuid::new_v4().to_string()),
            recurrence_id: None,
            occurrence_date: None,
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            deleted_at: None,
            created_at: Utc::now(),
            created_by,
            work: Vec::new(),
            delivery: Vec::new(),
        }
    }

    /// Create a new scheduled task from a trigger event.
    pub fn scheduled(event: &TriggerEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: TaskType::Scheduled,
            source_type: SourceType::ExternalTrigger,
            source_ref: Some(event.uid.clone()),
            title: event.title.clone(),
            instructions: event.instructions.clone(),
            status: TaskStatus::Pending,
            session_id: Some(uuid::Uuid::new_v4().to_string()),
            recurrence_id: None,
            occurrence_date: Some(event.occurrence.clone()),
            scheduled_for: Some(event.fire_at),
            started_at: None,
            completed_at: None,
            deleted_at: None,
            created_at: Utc::now(),
            created_by: CreatedBy::Scheduler,
            work: Vec::new(),
            delivery: event.delivery.clone(),
        }
    }

    /// Whether every delivery action carries pre-set content, i.e. the
    /// reasoning engine must not be invoked at all.
    pub fn fully_precomposed(&self) -> bool {
        !self.delivery.is_empty() && self.delivery.iter().all(|a| a.content.is_some())
    }

    /// Informational tasks have no delivery obligations.
    pub fn is_informational(&self) -> bool {
        self.delivery.is_empty()
    }

    /// Distinct channels this task may deliver to.
    pub fn allowed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.delivery.iter().map(|a| a.channel.clone()).collect();
        channels.sort();
        channels.dedup();
        channels
    }
}
