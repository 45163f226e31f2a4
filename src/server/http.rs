//! Multi-session HTTP transport. One long-lived server accepts POSTs at
//! `/mcp`; a bearer token gates the endpoint, scoping headers bind each
//! session to a user and workspace, and `initialize` hands back the session
//! id in the `Mcp-Session-Id` response header.

use crate::config::{BackendConfig, FileSystemConfig, get_settings};
use crate::errors::FsResult;
use crate::fs::{FileSystem, Workspace};
use crate::server::protocol::{PARSE_ERROR, RpcRequest, RpcResponse};
use anyhow::Result;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// One live session: a user-scoped router plus the facade bound at
/// initialize time.
pub struct SessionEntry {
    pub session_id: String,
    pub user_id: String,
    pub workspace_name: String,
    pub fs: Arc<FileSystem>,
    pub facade: Arc<Workspace>,
}

/// Shared state between handlers.
#[derive(Clone)]
pub struct HttpState {
    auth_token: Arc<String>,
    workspace_root: Arc<PathBuf>,
    backend: BackendConfig,
    max_output_length: Option<usize>,
    sessions: Arc<Mutex<HashMap<String, Arc<SessionEntry>>>>,
}

impl HttpState {
    /// Reads the one-shot settings; those must be initialized first.
    pub fn new(
        auth_token: String,
        backend: BackendConfig,
        max_output_length: Option<usize>,
    ) -> FsResult<Self> {
        let settings = get_settings()?;
        Ok(Self {
            auth_token: Arc::new(auth_token),
            workspace_root: Arc::new(settings.workspace_root),
            backend,
            max_output_length,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn session(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn insert_session(&self, entry: Arc<SessionEntry>) {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(entry.session_id.clone(), entry);
    }

    fn remove_session(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id)
    }
}

pub fn build_router(state: HttpState) -> axum::Router {
    axum::Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.session_count(),
        "version": crate::VERSION,
    }))
}

fn bad_request(reason: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": reason.into()})),
    )
        .into_response()
}

/// Constant-time bearer comparison; missing or wrong token is a 401.
fn check_bearer(state: &HttpState, headers: &HeaderMap) -> bool {
    let Some(provided) = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    provided
        .as_bytes()
        .ct_eq(state.auth_token.as_bytes())
        .into()
}

async fn mcp_handler(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !check_bearer(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing or invalid bearer token"})),
        )
            .into_response();
    }

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(RpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("invalid request: {e}"),
                )),
            )
                .into_response();
        }
    };

    if request.method == "initialize" {
        return initialize_session(&state, &headers, &request).await;
    }

    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return bad_request("Session not found");
    };
    let Some(session) = state.session(session_id) else {
        return bad_request("Session not found");
    };

    if request.method == "session/close" {
        if let Some(entry) = state.remove_session(session_id) {
            entry.fs.destroy().await;
            info!(session_id, user_id = %entry.user_id, "session closed");
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        return Json(RpcResponse::success(id, json!({}))).into_response();
    }

    match crate::server::dispatch(&session.facade, &request).await {
        Some(response) => Json(response).into_response(),
        // Notification: accepted, nothing to say.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn initialize_session(
    state: &HttpState,
    headers: &HeaderMap,
    request: &RpcRequest,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let Some(user_id) = header("X-User-ID") else {
        return bad_request("X-User-ID header is required");
    };
    let workspace_name = header("X-Workspace").unwrap_or_else(|| "default".to_string());
    let Some(client_root) = header("X-Workspace-Root") else {
        return bad_request("X-Workspace-Root header is required");
    };

    // A client configured against a different root would read every returned
    // path wrong; refuse the session up front.
    let server_root = state.workspace_root.to_string_lossy();
    if client_root != server_root {
        warn!(%client_root, %server_root, "workspace root mismatch");
        return bad_request(format!(
            "workspace root mismatch: client has '{client_root}', server has '{server_root}'"
        ));
    }

    let config = FileSystemConfig {
        user_id: user_id.clone(),
        backend: state.backend.clone(),
        max_output_length: state.max_output_length,
    };
    let fs = match FileSystem::new(config) {
        Ok(fs) => Arc::new(fs),
        Err(e) => return bad_request(e.to_string()),
    };
    let facade = match fs.workspace(&workspace_name, None).await {
        Ok(facade) => facade,
        Err(e) => return bad_request(e.to_string()),
    };

    let session_id = Uuid::new_v4().to_string();
    info!(%session_id, %user_id, %workspace_name, "session initialized");
    state.insert_session(Arc::new(SessionEntry {
        session_id: session_id.clone(),
        user_id,
        workspace_name,
        fs,
        facade,
    }));

    let id = request.id.clone().unwrap_or(Value::Null);
    (
        [(SESSION_HEADER, session_id)],
        Json(RpcResponse::success(id, crate::server::initialize_result())),
    )
        .into_response()
}

/// Bind and serve until the task is aborted.
pub async fn serve(host: &str, port: u16, state: HttpState) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP tool server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
