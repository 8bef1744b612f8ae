//! # OpsPilot Store
//!
//! SQLite-backed persistence — survives restarts, supports the pipeline's
//! durability ordering (ledger write before task creation). Tests and
//! embedders can open everything in memory.

pub mod ledger;
pub mod task_store;

pub use ledger::TriggerLedger;
pub use task_store::{TaskFilter, TaskStore, TaskUpdate};
