//! # OpsPilot Scheduler
//!
//! Polls the trigger source on a fixed interval with a bounded look-ahead
//! window, consults the trigger ledger, and creates or resumes a task for
//! each newly fireable event. The poll loop itself never blocks on task
//! execution — created tasks are handed to the executor queue.

pub mod poll;
pub mod sources;

pub use poll::{spawn_scheduler, Scheduler};
pub use sources::FileTriggerSource;
