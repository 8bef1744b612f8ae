//! WebSocket handler for real-time task status push.
//!
//! Protocol:
//! ← Server sends: {"type":"connected", ...} on upgrade
//! ← Server sends: {"type":"status","task_id":"...","status":"...","timestamp":"..."}
//!    on every task transition
//! → Client sends: {"type":"ping"} → {"type":"pong"}
//!
//! Push to a lagging or disconnected client is not guaranteed; clients repair
//! by pulling `GET /api/v1/tasks/snapshot`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::server::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection: relay status broadcasts, answer pings.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("WebSocket client connected");

    let mut events = state.hub.subscribe();

    let welcome = serde_json::json!({
        "type": "connected",
        "message": "OpsPilot Gateway — WebSocket connected",
        "version": env!("CARGO_PKG_VERSION"),
        "snapshot_url": "/api/v1/tasks/snapshot",
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = serde_json::json!({
                            "type": "status",
                            "task_id": event.task_id,
                            "status": event.status.as_str(),
                            "timestamp": event.timestamp.to_rfc3339(),
                        });
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Client fell behind; tell it to pull a snapshot.
                        tracing::warn!("WS subscriber lagged, {missed} event(s) dropped");
                        let frame = serde_json::json!({
                            "type": "lagged",
                            "missed": missed,
                            "snapshot_url": "/api/v1/tasks/snapshot",
                        });
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let json: serde_json::Value =
                            serde_json::from_str(&text).unwrap_or_default();
                        match json["type"].as_str().unwrap_or("unknown") {
                            "ping" => {
                                let pong = serde_json::json!({
                                    "type": "pong",
                                    "timestamp": chrono::Utc::now().timestamp_millis(),
                                });
                                let _ = send_json(&mut socket, &pong).await;
                            }
                            other => {
                                let error = serde_json::json!({
                                    "type": "error",
                                    "message": format!("Unknown message type: {other}"),
                                });
                                let _ = send_json(&mut socket, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::error!("WS send failed: {e}");
        })
}
