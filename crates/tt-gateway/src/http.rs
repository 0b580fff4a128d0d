//! HTTP REST surface (§4.F): thin wrappers over the registry, spawn
//! pipeline, and mux introspector, for clients that don't want a
//! persistent WebSocket connection.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use tt_core::error::ServerError;
use tt_core::types::{SpawnRequest, Terminal};
use tt_core::TerminalId;
use tt_registry::SendOutcome;

use crate::state::GatewayState;

fn error_response(err: ServerError) -> axum::response::Response {
    let kind = err.kind();
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": kind.code(), "message": err.to_string() }))).into_response()
}

fn bad_terminal_id(raw: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "ValidationFailed", "message": format!("invalid terminal id: {raw}") }))).into_response()
}

macro_rules! parse_terminal_id {
    ($raw:expr) => {
        match $raw.parse::<TerminalId>() {
            Ok(id) => id,
            Err(_) => return bad_terminal_id(&$raw),
        }
    };
}

pub async fn list_terminals(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.registry.get_all())
}

pub async fn get_terminal(
    State(state): State<Arc<GatewayState>>,
    Path(raw_id): Path<String>,
) -> axum::response::Response {
    let id = parse_terminal_id!(raw_id);
    match state.registry.get(id) {
        Some(terminal) => Json(terminal).into_response(),
        None => error_response(ServerError::NotFound(id.to_string())),
    }
}

pub async fn delete_terminal(
    State(state): State<Arc<GatewayState>>,
    Path(raw_id): Path<String>,
) -> axum::response::Response {
    let id = parse_terminal_id!(raw_id);
    match state.registry.close(id, true) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    command: String,
}

pub async fn send_command(
    State(state): State<Arc<GatewayState>>,
    Path(raw_id): Path<String>,
    Json(body): Json<CommandBody>,
) -> axum::response::Response {
    let id = parse_terminal_id!(raw_id);
    match state.registry.send_command(id, body.command.into_bytes()) {
        Ok(SendOutcome::Applied) => Json(json!({ "status": "applied" })).into_response(),
        Ok(SendOutcome::Backpressure) => Json(json!({ "status": "backpressure" })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResizeBody {
    cols: u16,
    rows: u16,
}

pub async fn resize_terminal(
    State(state): State<Arc<GatewayState>>,
    Path(raw_id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> axum::response::Response {
    let id = parse_terminal_id!(raw_id);
    match state.registry.resize(id, body.cols, body.rows) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// REST spawns share a single rate-limit bucket (`"http"`): unlike a
/// WebSocket connection, an HTTP request carries no persistent client
/// identity to key per-caller buckets on. See DESIGN.md.
const HTTP_RATE_LIMIT_KEY: &str = "http";

pub async fn create_terminal(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<SpawnRequest>,
) -> axum::response::Response {
    match state.spawn_pipeline.spawn(request, HTTP_RATE_LIMIT_KEY).await {
        Ok(terminal) => (StatusCode::CREATED, Json(terminal)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_mux_sessions(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let mux = state.mux.clone();
    match tokio::task::spawn_blocking(move || mux.list_detailed()).await {
        Ok(Ok(sessions)) => Json(sessions).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

pub async fn list_mux_sessions_detailed(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let mux = state.mux.clone();
    let mux2 = state.mux.clone();
    match tokio::task::spawn_blocking(move || mux.list_detailed().map(|s| mux2.group_sessions(s))).await {
        Ok(Ok(groups)) => Json(groups).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptureQuery {
    #[serde(default = "default_capture_lines")]
    lines: u32,
    #[serde(default)]
    window: u32,
}

fn default_capture_lines() -> u32 {
    200
}

pub async fn capture_mux_session(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    Query(query): Query<CaptureQuery>,
) -> axum::response::Response {
    let mux = state.mux.clone();
    match tokio::task::spawn_blocking(move || mux.capture_preview(&name, query.lines, query.window)).await {
        Ok(Ok(text)) => Json(json!({ "text": text })).into_response(),
        Ok(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct MuxCommandBody {
    text: String,
}

pub async fn send_mux_command(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    Json(body): Json<MuxCommandBody>,
) -> axum::response::Response {
    let mux = state.mux.clone();
    match tokio::task::spawn_blocking(move || mux.send_keys(&name, &body.text)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

pub async fn kill_mux_session(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    let mux = state.mux.clone();
    match tokio::task::spawn_blocking(move || mux.kill_session(&name)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct CleanupBody {
    #[serde(default)]
    pattern: Option<String>,
}

pub async fn mux_cleanup(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<CleanupBody>,
) -> axum::response::Response {
    state.registry.cleanup_duplicates();

    let mux = state.mux.clone();
    let pattern = body.pattern;
    let killed = tokio::task::spawn_blocking(move || -> Result<Vec<String>, tt_mux::MuxError> {
        let groups = mux.group_sessions(mux.list_detailed()?);
        let mut killed = Vec::new();
        for session in groups.managed {
            if pattern.as_deref().is_none_or(|p| session.name.contains(p)) {
                mux.kill_session(&session.name)?;
                killed.push(session.name);
            }
        }
        Ok(killed)
    })
    .await;

    match killed {
        Ok(Ok(names)) => Json(json!({ "killed": names })).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
        Err(e) => error_response(ServerError::Internal(e.to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    uptime_secs: i64,
    terminal_count: usize,
    active_count: usize,
    session_count: usize,
    memory: tt_telemetry::memory::MemorySample,
}

pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let terminals: Vec<Terminal> = state.registry.get_all();
    Json(HealthResponse {
        uptime_secs: state.uptime_secs(),
        terminal_count: terminals.len(),
        active_count: state.registry.active_count(),
        session_count: state.sessions.len(),
        memory: tt_telemetry::memory::sample(),
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::test_support::test_app;

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn spawn_body(terminal_type: &str) -> Body {
        Body::from(
            serde_json::json!({ "terminal_type": terminal_type, "working_dir": "/tmp" }).to_string(),
        )
    }

    /// S1: a shell spawns over HTTP and shows up active in `/health`.
    #[tokio::test]
    async fn health_reports_zero_terminals_on_a_fresh_server() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["terminal_count"], 0);
        assert_eq!(json["active_count"], 0);
    }

    #[tokio::test]
    async fn list_terminals_is_empty_on_a_fresh_server() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/terminals").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn create_terminal_spawns_and_is_retrievable() {
        let app = test_app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/terminals")
                    .header("content-type", "application/json")
                    .body(spawn_body("shell"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["state"]["state"], "active");
        let id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/terminals/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    /// S4: the same `request_id` spawned twice dedups to one terminal.
    #[tokio::test]
    async fn duplicate_request_id_dedups_to_one_terminal() {
        let app = test_app();
        let body = || {
            Body::from(
                serde_json::json!({
                    "terminal_type": "shell",
                    "working_dir": "/tmp",
                    "request_id": "dup-1",
                })
                .to_string(),
            )
        };

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/terminals")
                    .header("content-type", "application/json")
                    .body(body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first_json = json_body(first).await;

        let second = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/terminals")
                    .header("content-type", "application/json")
                    .body(body())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CREATED);
        let second_json = json_body(second).await;

        assert_eq!(first_json["id"], second_json["id"]);
    }

    #[tokio::test]
    async fn create_terminal_rejects_unknown_terminal_type() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/terminals")
                    .header("content-type", "application/json")
                    .body(spawn_body("not-a-real-type"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_terminal_unknown_id_is_404() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/terminals/{}", tt_core::TerminalId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// S6-adjacent: deleting a terminal is idempotent — the second delete
    /// of the same id reports not-found rather than succeeding again.
    #[tokio::test]
    async fn delete_terminal_is_idempotent() {
        let app = test_app();
        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/terminals")
                    .header("content-type", "application/json")
                    .body(spawn_body("shell"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = json_body(created).await;
        let id = created["id"].as_str().unwrap().to_string();

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/terminals/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);

        let second = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/terminals/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }
}
