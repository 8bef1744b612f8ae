//! HTTP server implementation using Axum.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use opspilot_core::config::GatewayConfig;
use opspilot_core::types::Task;
use opspilot_core::StatusHub;
use opspilot_store::TaskStore;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub store: Arc<TaskStore>,
    pub hub: Arc<StatusHub>,
    /// Hands freshly created immediate tasks to the execution worker.
    pub queue: mpsc::Sender<Task>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/info", get(super::routes::system_info))
        .route("/api/v1/tasks", post(super::routes::create_task))
        .route("/api/v1/tasks", get(super::routes::list_tasks))
        .route("/api/v1/tasks/snapshot", get(super::routes::task_snapshot))
        .route("/api/v1/tasks/{id}", get(super::routes::get_task))
        .route("/api/v1/tasks/{id}/update", post(super::routes::update_task))
        .route(
            "/api/v1/tasks/{id}/complete",
            post(super::routes::complete_task),
        )
        .route("/api/v1/tasks/{id}/delete", post(super::routes::delete_task))
        .route(
            "/api/v1/tasks/{id}/resolve",
            post(super::routes::resolve_task),
        )
        .route(
            "/api/v1/tasks/{id}/conversations",
            get(super::routes::task_conversations),
        )
        .route(
            "/api/v1/conversations/{id}/tasks",
            get(super::routes::conversation_tasks),
        )
        .route("/api/v1/attention", get(super::routes::attention_items))
        .route("/ws", get(super::ws::ws_handler))
        .route("/health", get(super::routes::health_check))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict CORS origins in production via env var
            // Example: OPSPILOT_CORS_ORIGINS=https://ops.example.com
            if let Ok(origins_str) = std::env::var("OPSPILOT_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server. Runs until the process exits.
pub async fn start(
    config: &GatewayConfig,
    store: Arc<TaskStore>,
    hub: Arc<StatusHub>,
    queue: mpsc::Sender<Task>,
) -> anyhow::Result<()> {
    let state = AppState {
        gateway_config: config.clone(),
        store,
        hub,
        queue,
        start_time: std::time::Instant::now(),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
