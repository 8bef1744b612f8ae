//! # OpsPilot Core
//!
//! Shared foundation for the OpsPilot task pipeline: the task data model,
//! configuration, error types, the status broadcast hub, and the trait seams
//! the pipeline is assembled from (reasoning engine, delivery channels,
//! trigger source).

pub mod config;
pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use config::OpsPilotConfig;
pub use error::{OpsPilotError, Result};
pub use status::StatusHub;
pub use traits::{DeliveryChannel, ReasoningEngine, TriggerSource};
pub use types::{
    ConversationLink, CreatedBy, DeliveryAction, DeliveryStatus, SourceType, StatusEvent, Task,
    TaskStatus, TaskType, TriggerEvent, WorkItem, WorkItemStatus,
};
