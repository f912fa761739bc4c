//! REST API server for the companion agent
//!
//! Exposes the engine to a chat-transport layer via HTTP endpoints. This is
//! a thin adapter: message delivery, buttons and menus live in the transport,
//! not here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::CompanionAgent;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub user_id: Option<String>,
    /// Omit for an indefinite suspension
    pub minutes: Option<i64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<CompanionAgent>,
}

/// =============================
/// Helpers — String → Uuid
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Empty message".into())),
        );
    }

    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");
    info!(%user_id, "Received chat message");

    let reply = state.agent.handle_message(user_id, &req.message).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "reply": reply,
            "user_id": user_id.to_string(),
        }))),
    )
}

/// =============================
/// Context Endpoint
/// =============================

async fn context_handler(
    State(state): State<ApiState>,
    Json(req): Json<ContextRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    let context = state.agent.get_context(user_id, &req.prompt).await;

    (StatusCode::OK, Json(ApiResponse::success(context)))
}

/// =============================
/// Facts Endpoint
/// =============================

async fn facts_handler(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(Some(&user_id), "anonymous-user");

    match state.agent.facts_summary(user_id).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to load facts: {}", e))),
        ),
    }
}

/// =============================
/// Session & Learning Endpoints
/// =============================

async fn reset_session_handler(
    State(state): State<ApiState>,
    Json(req): Json<SessionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    let session_id = state.agent.reset_session(user_id).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "session_id": session_id.to_string(),
        }))),
    )
}

async fn suspend_learning_handler(
    State(state): State<ApiState>,
    Json(req): Json<SuspendRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    let until = req
        .minutes
        .map(|minutes| chrono::Utc::now() + chrono::Duration::minutes(minutes));
    state.agent.suspend_learning(user_id, until).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "suspended": true,
            "until": until.map(|t| t.to_rfc3339()),
        }))),
    )
}

async fn resume_learning_handler(
    State(state): State<ApiState>,
    Json(req): Json<SessionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    state.agent.resume_learning(user_id).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "suspended": false,
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<CompanionAgent>) -> Router {
    let state = ApiState { agent };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/context", post(context_handler))
        .route("/api/facts/:user_id", get(facts_handler))
        .route("/api/session/reset", post(reset_session_handler))
        .route("/api/learning/suspend", post(suspend_learning_handler))
        .route("/api/learning/resume", post(resume_learning_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<CompanionAgent>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_uuid_is_deterministic() {
        let a = stable_uuid_from_string("telegram:123456");
        let b = stable_uuid_from_string("telegram:123456");
        let c = stable_uuid_from_string("telegram:654321");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_parse_or_stable_uuid() {
        let parsed = parse_or_stable_uuid(Some("6a6f686e-0000-4000-8000-000000000000"), "seed");
        assert_eq!(
            parsed.to_string(),
            "6a6f686e-0000-4000-8000-000000000000"
        );

        let fallback = parse_or_stable_uuid(None, "seed");
        let blank = parse_or_stable_uuid(Some("   "), "seed");
        assert_eq!(fallback, blank);
    }
}
