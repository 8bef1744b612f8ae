//! API route handlers for the gateway.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use opspilot_core::types::{
    CreatedBy, DeliveryAction, SourceType, Task, TaskStatus, TaskType,
};
use opspilot_store::{TaskFilter, TaskUpdate};

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "opspilot-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    let task_count = state.store.count().unwrap_or(0);
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": uptime.as_secs(),
        "task_count": task_count,
        "gateway": {
            "host": state.gateway_config.host,
            "port": state.gateway_config.port,
        }
    }))
}

/// Create a task. Immediate tasks are queued for execution right away;
/// scheduled ones wait for their `scheduled_for` time.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let title = body["title"].as_str().unwrap_or("").trim();
    let instructions = body["instructions"].as_str().unwrap_or("").trim();
    if title.is_empty() || instructions.is_empty() {
        return Json(
            serde_json::json!({"ok": false, "error": "title and instructions are required"}),
        );
    }

    let created_by = body["created_by"]
        .as_str()
        .and_then(|s| serde_json::from_value::<CreatedBy>(serde_json::json!(s)).ok())
        .unwrap_or(CreatedBy::User);
    let mut task = Task::immediate(title, instructions, created_by);

    if let Some(t) = body["type"].as_str() {
        match serde_json::from_value::<TaskType>(serde_json::json!(t)) {
            Ok(task_type) => task.task_type = task_type,
            Err(_) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("unknown task type: {t}")}),
                )
            }
        }
    }
    if let Some(s) = body["source_type"].as_str() {
        match serde_json::from_value::<SourceType>(serde_json::json!(s)) {
            Ok(source_type) => task.source_type = source_type,
            Err(_) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("unknown source type: {s}")}),
                )
            }
        }
    }
    if let Some(s) = body["source_ref"].as_str() {
        task.source_ref = Some(s.to_string());
    }
    if let Some(s) = body["recurrence_id"].as_str() {
        task.recurrence_id = Some(s.to_string());
        // Occurrences of one recurrence share the first occurrence's session.
        match state.store.first_of_recurrence(s) {
            Ok(Some(first)) => task.session_id = first.session_id.clone(),
            Ok(None) => {}
            Err(e) => return Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        }
    }
    if let Some(s) = body["occurrence_date"].as_str() {
        task.occurrence_date = Some(s.to_string());
    }
    if let Some(s) = body["scheduled_for"].as_str() {
        match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(ts) => task.scheduled_for = Some(ts.with_timezone(&chrono::Utc)),
            Err(e) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("bad scheduled_for: {e}")}),
                )
            }
        }
    }
    if !body["delivery"].is_null() {
        match serde_json::from_value::<Vec<DeliveryAction>>(body["delivery"].clone()) {
            Ok(actions) => task.delivery = actions,
            Err(e) => {
                return Json(serde_json::json!({"ok": false, "error": format!("bad delivery: {e}")}))
            }
        }
    }

    if let Err(e) = state.store.save(&task) {
        return Json(serde_json::json!({"ok": false, "error": e.to_string()}));
    }
    if let Some(conversation_id) = body["conversation_id"].as_str() {
        if let Err(e) = state.store.link_conversation(&task.id, conversation_id) {
            tracing::warn!("Conversation link failed for {}: {e}", task.id);
        }
    }
    state.hub.publish(&task.id, TaskStatus::Pending);

    // Immediate tasks go straight to the execution worker.
    if task.task_type == TaskType::Immediate {
        if let Err(e) = state.queue.send(task.clone()).await {
            tracing::error!("Task {} not queued: {e}", task.id);
        }
    }

    Json(serde_json::json!({"ok": true, "task": task}))
}

/// List tasks with optional filters. Soft-deleted tasks are excluded unless
/// `include_deleted=true`.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let mut filter = TaskFilter::default();
    if let Some(s) = params.get("status") {
        match TaskStatus::from_str(s) {
            Ok(status) => filter.status = Some(status),
            Err(e) => return Json(serde_json::json!({"ok": false, "error": e})),
        }
    }
    if let Some(t) = params.get("type") {
        match serde_json::from_value::<TaskType>(serde_json::json!(t)) {
            Ok(task_type) => filter.task_type = Some(task_type),
            Err(_) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("unknown task type: {t}")}),
                )
            }
        }
    }
    if let Some(s) = params.get("source_type") {
        match serde_json::from_value::<SourceType>(serde_json::json!(s)) {
            Ok(source_type) => filter.source_type = Some(source_type),
            Err(_) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("unknown source type: {s}")}),
                )
            }
        }
    }
    if let Some(rid) = params.get("recurrence_id") {
        filter.recurrence_id = Some(rid.clone());
    }
    filter.include_deleted = params
        .get("include_deleted")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    match state.store.list(&filter) {
        Ok(tasks) => Json(serde_json::json!({"ok": true, "count": tasks.len(), "tasks": tasks})),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.store.get(&id) {
        Ok(Some(task)) => Json(serde_json::json!({"ok": true, "task": task})),
        Ok(None) => Json(serde_json::json!({"ok": false, "error": format!("Task not found: {id}")})),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Update whitelisted fields of a task. `deleted` is rejected here; use the
/// delete endpoint.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let mut update = TaskUpdate::default();
    if let Some(v) = body["title"].as_str() {
        update.title = Some(v.to_string());
    }
    if let Some(v) = body["instructions"].as_str() {
        update.instructions = Some(v.to_string());
    }
    if let Some(v) = body["status"].as_str() {
        match TaskStatus::from_str(v) {
            Ok(status) => update.status = Some(status),
            Err(e) => return Json(serde_json::json!({"ok": false, "error": e})),
        }
    }
    if let Some(v) = body["scheduled_for"].as_str() {
        match chrono::DateTime::parse_from_rfc3339(v) {
            Ok(ts) => update.scheduled_for = Some(ts.with_timezone(&chrono::Utc)),
            Err(e) => {
                return Json(
                    serde_json::json!({"ok": false, "error": format!("bad scheduled_for: {e}")}),
                )
            }
        }
    }

    match state.store.update(&id, &update) {
        Ok(task) => {
            if let Some(status) = update.status {
                state.hub.publish(&task.id, status);
            }
            Json(serde_json::json!({"ok": true, "task": task}))
        }
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Mark a task completed. Optional `conversation_id` link side effect.
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Json<serde_json::Value> {
    match state.store.complete(&id) {
        Ok(task) => {
            if let Some(Json(body)) = body {
                if let Some(conversation_id) = body["conversation_id"].as_str() {
                    if let Err(e) = state.store.link_conversation(&id, conversation_id) {
                        tracing::warn!("Conversation link failed for {id}: {e}");
                    }
                }
            }
            state.hub.publish(&task.id, TaskStatus::Completed);
            Json(serde_json::json!({"ok": true, "task": task}))
        }
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Soft-delete a task. The row stays in the store, excluded from default
/// listings.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Json<serde_json::Value> {
    match state.store.soft_delete(&id) {
        Ok(task) => {
            if let Some(Json(body)) = body {
                if let Some(conversation_id) = body["conversation_id"].as_str() {
                    if let Err(e) = state.store.link_conversation(&id, conversation_id) {
                        tracing::warn!("Conversation link failed for {id}: {e}");
                    }
                }
            }
            state.hub.publish(&task.id, TaskStatus::Deleted);
            Json(serde_json::json!({"ok": true, "task": task}))
        }
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Manually resolve a `needs_review` task to completed or failed.
pub async fn resolve_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let target = match body["status"].as_str().map(TaskStatus::from_str) {
        Some(Ok(status @ (TaskStatus::Completed | TaskStatus::Failed))) => status,
        _ => {
            return Json(serde_json::json!({
                "ok": false,
                "error": "status must be 'completed' or 'failed'",
            }))
        }
    };

    let task = match state.store.get(&id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            return Json(
                serde_json::json!({"ok": false, "error": format!("Task not found: {id}")}),
            )
        }
        Err(e) => return Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    };
    if !task.status.can_transition_to(target) || task.status != TaskStatus::NeedsReview {
        return Json(serde_json::json!({
            "ok": false,
            "error": format!("cannot resolve a task in status '{}'", task.status.as_str()),
        }));
    }

    let result = if target == TaskStatus::Completed {
        state.store.complete(&id)
    } else {
        state.store.update(
            &id,
            &TaskUpdate {
                status: Some(TaskStatus::Failed),
                ..Default::default()
            },
        )
    };
    match result {
        Ok(task) => {
            state.hub.publish(&task.id, target);
            tracing::info!("Task {} manually resolved to {}", id, target.as_str());
            Json(serde_json::json!({"ok": true, "task": task}))
        }
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Conversations linked to a task (read-only).
pub async fn task_conversations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.store.conversations_for_task(&id) {
        Ok(links) => Json(serde_json::json!({"ok": true, "links": links})),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Tasks linked to a conversation (read-only, excludes soft-deleted).
pub async fn conversation_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.store.tasks_for_conversation(&id) {
        Ok(tasks) => Json(serde_json::json!({"ok": true, "tasks": tasks})),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Full task snapshot for late subscribers — everything a client needs to
/// repair missed status pushes.
pub async fn task_snapshot(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.list(&TaskFilter::default()) {
        Ok(tasks) => Json(serde_json::json!({
            "ok": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "count": tasks.len(),
            "tasks": tasks,
        })),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}

/// Recent attention items (needs-review notifications), newest last.
pub async fn attention_items(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.hub.attention_items() {
        Ok(items) => Json(serde_json::json!({"ok": true, "count": items.len(), "items": items})),
        Err(e) => Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    }
}
