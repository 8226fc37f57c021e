// ABOUTME: HTTP control surface: inject events, join/leave rooms, health and Prometheus metrics
// ABOUTME: Mutating routes require the x-api-key header when an API key is configured

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use noko_core::{InboundEvent, RoomManager};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub manager: Arc<RoomManager>,
    pub api_key: Option<String>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub config_generation: u64,
    pub rooms: Vec<String>,
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn respond(status: StatusCode, message: impl Into<String>) -> ApiResult {
    (
        status,
        Json(ApiResponse {
            success: status.is_success(),
            message: message.into(),
        }),
    )
}

/// Reject the request unless the configured key matches
fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiResult> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        Some(_) => {
            tracing::warn!("Rejected request with invalid API key");
            Err(respond(StatusCode::UNAUTHORIZED, "Invalid API key"))
        }
        None => Err(respond(StatusCode::UNAUTHORIZED, "Missing API key")),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/events", post(event_handler))
        .route("/rooms/{room_id}/join", post(join_handler))
        .route("/rooms/{room_id}/leave", post(leave_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the task is aborted
pub async fn serve(host: &str, port: u16, state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    tracing::info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        config_generation: state.manager.config().generation(),
        rooms: state.manager.joined_rooms(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics are disabled".to_string()),
    }
}

async fn event_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> ApiResult {
    if let Err(rejection) = check_api_key(&state, &headers) {
        return rejection;
    }
    if event.room_id.trim().is_empty() || event.actor_id.trim().is_empty() {
        return respond(StatusCode::BAD_REQUEST, "room_id and actor_id are required");
    }
    if !event.is_direct && !state.manager.is_joined(&event.room_id) {
        return respond(
            StatusCode::NOT_FOUND,
            format!("Not in room {}", event.room_id),
        );
    }

    let room_id = event.room_id.clone();
    match state.manager.submit(event).await {
        Ok(()) => respond(StatusCode::ACCEPTED, format!("Queued for {}", room_id)),
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to queue event");
            respond(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn join_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult {
    if let Err(rejection) = check_api_key(&state, &headers) {
        return rejection;
    }
    if state.manager.join(&room_id) {
        respond(StatusCode::OK, format!("Joined {}", room_id))
    } else {
        respond(StatusCode::OK, format!("Already in {}", room_id))
    }
}

async fn leave_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult {
    if let Err(rejection) = check_api_key(&state, &headers) {
        return rejection;
    }
    if state.manager.leave(&room_id) {
        respond(StatusCode::OK, format!("Left {}", room_id))
    } else {
        respond(StatusCode::NOT_FOUND, format!("Not in room {}", room_id))
    }
}
