//! REST API Server for the Credit Pack Orchestrator
//!
//! One orchestrator per session, created on demand and kept in memory.
//! Requests for the same session are serialized by the session's mutex.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::UploadedFile;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct FileUpload {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub step_index: usize,
    #[serde(default)]
    pub instruction: String,
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

type ApiResult = (StatusCode, Json<ApiResponse>);

fn not_found(e: OrchestrationError) -> ApiResult {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string())))
}

/// =============================
/// API State
/// =============================

/// Builds a fresh orchestrator for each new session
pub type OrchestratorFactory = Arc<dyn Fn() -> Orchestrator + Send + Sync>;

type Session = Arc<Mutex<Orchestrator>>;

#[derive(Clone)]
pub struct ApiState {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    factory: OrchestratorFactory,
}

impl ApiState {
    pub fn new(factory: OrchestratorFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory,
        }
    }

    async fn create_session(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        let orchestrator = (self.factory)();
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(orchestrator)));
        session_id
    }

    async fn session(&self, raw_id: &str) -> Result<Session, OrchestrationError> {
        let session_id = Uuid::parse_str(raw_id)
            .map_err(|_| OrchestrationError::SessionNotFound(raw_id.to_string()))?;
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::SessionNotFound(raw_id.to_string()))
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
/// Session Endpoints
/// =============================

async fn create_session(State(state): State<ApiState>) -> ApiResult {
    let session_id = state.create_session().await;
    info!(%session_id, "Session created");

    (
        StatusCode::CREATED,
        Json(ApiResponse::success(serde_json::json!({ "session_id": session_id }))),
    )
}

async fn post_message(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult {
    let session = match state.session(&session_id).await {
        Ok(session) => session,
        Err(e) => return not_found(e),
    };

    let files = req
        .files
        .into_iter()
        .map(|f| UploadedFile::new(f.name, f.content))
        .collect::<Vec<_>>();
    debug!(%session_id, files = files.len(), "Message received");

    let mut orchestrator = session.lock().await;
    let response = orchestrator.process_message(&req.message, files).await;

    (StatusCode::OK, Json(ApiResponse::success(response)))
}

async fn get_steps(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let session = match state.session(&session_id).await {
        Ok(session) => session,
        Err(e) => return not_found(e),
    };

    let orchestrator = session.lock().await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(orchestrator.get_step_history())),
    )
}

async fn replay(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(req): Json<ReplayRequest>,
) -> ApiResult {
    let session = match state.session(&session_id).await {
        Ok(session) => session,
        Err(e) => return not_found(e),
    };

    info!(%session_id, step_index = req.step_index, "Replay requested");
    let mut orchestrator = session.lock().await;
    let response = orchestrator
        .replay_from_step(req.step_index, &req.instruction)
        .await;

    (StatusCode::OK, Json(ApiResponse::success(response)))
}

async fn get_context(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let session = match state.session(&session_id).await {
        Ok(session) => session,
        Err(e) => return not_found(e),
    };

    let orchestrator = session.lock().await;
    let context = orchestrator.context();
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "workflow": context.snapshot(),
            "turn_count": context.turn_count,
            "awaiting_approval": context.awaiting_approval,
            "summary": context.state_summary(),
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(factory: OrchestratorFactory) -> Router {
    let state = ApiState::new(factory);

    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/steps", get(get_steps))
        .route("/api/sessions/:id/replay", post(replay))
        .route("/api/sessions/:id/context", get(get_context))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    factory: OrchestratorFactory,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(factory);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::llm::ScriptedLlm;
    use crate::search::{SearchOutcome, StaticSearch};
    use crate::specialists::Specialists;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Every session's classifier routes its first turns to `analyze_deal`
    fn test_router() -> Router {
        create_router(Arc::new(|| {
            Orchestrator::new(
                Arc::new(ScriptedLlm::new(["analyze_deal", "show_state"])),
                Specialists::mock(),
                Arc::new(StaticSearch::new(SearchOutcome::ok(vec![]))),
                OrchestratorConfig::default(),
            )
        }))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn new_session(router: &Router) -> String {
        let (status, body) = call(router, "POST", "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&test_router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_message_steps_and_context() {
        let router = test_router();
        let id = new_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/messages", id),
            Some(json!({
                "message": "analyze this deal",
                "files": [{ "name": "acme_teaser.txt", "content": "Acme seeks EUR 25m" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["intent"], "analyze_deal");
        assert_eq!(body["data"]["is_error"], false);
        assert_eq!(body["data"]["step_index"], 0);

        let (_, steps) = call(&router, "GET", &format!("/api/sessions/{}/steps", id), None).await;
        assert_eq!(steps["data"].as_array().unwrap().len(), 1);
        assert_eq!(steps["data"][0]["label"], "Analyze deal");

        let (_, context) = call(&router, "GET", &format!("/api/sessions/{}/context", id), None).await;
        assert_eq!(context["data"]["turn_count"], 1);
        assert_eq!(context["data"]["workflow"]["teaser_filename"], "acme_teaser.txt");
    }

    #[tokio::test]
    async fn test_replay_out_of_range_is_error_result() {
        let router = test_router();
        let id = new_session(&router).await;

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/sessions/{}/replay", id),
            Some(json!({ "step_index": 3 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_error"], true);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let router = test_router();

        let (status, body) = call(
            &router,
            "GET",
            &format!("/api/sessions/{}/steps", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&router, "GET", "/api/sessions/not-a-uuid/context", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
