//! # OpsPilot Gateway
//!
//! HTTP/WebSocket control surface: task CRUD, manual resolution, conversation
//! links, status push, and the snapshot endpoint late subscribers use to
//! repair missed updates.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{build_router, start, AppState};
