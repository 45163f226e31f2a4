use super::http::{HttpState, SESSION_HEADER, build_router};
use super::protocol::{RpcRequest, RpcResponse};
use crate::config::settings::{init_settings, reset_settings, test_guard};
use crate::config::{BackendConfig, FileSystemConfig, LocalBackendConfig};
use crate::fs::FileSystem;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "test-token-123";

fn fresh_state() -> (std::sync::MutexGuard<'static, ()>, TempDir, HttpState) {
    let guard = test_guard();
    reset_settings();
    let tmp = TempDir::new().unwrap();
    init_settings("cfs-test", Some(tmp.path().to_path_buf())).unwrap();
    let state = HttpState::new(
        TOKEN.to_string(),
        BackendConfig::Local(LocalBackendConfig::default()),
        None,
    )
    .unwrap();
    (guard, tmp, state)
}

fn rpc(method: &str, id: u64, params: Value) -> String {
    serde_json::to_string(&json!({
        "jsonrpc": "2.0",
        "method": method,
        "id": id,
        "params": params
    }))
    .unwrap()
}

fn post_mcp(body: String) -> http_builder::Builder {
    http_builder::Builder {
        builder: Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json"),
        body,
    }
}

/// Small helper so tests read as a chain of headers then send.
mod http_builder {
    pub struct Builder {
        pub builder: axum::http::request::Builder,
        pub body: String,
    }

    impl Builder {
        pub fn header(mut self, name: &str, value: &str) -> Self {
            self.builder = self.builder.header(name, value);
            self
        }

        pub fn build(self) -> axum::http::Request<axum::body::Body> {
            self.builder.body(axum::body::Body::from(self.body)).unwrap()
        }
    }
}

async fn body_json(response: axum::http::Response<axum::body::Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initialize(app: &axum::Router, root: &str) -> (StatusCode, Option<String>, Value) {
    let req = post_mcp(rpc("initialize", 1, json!({})))
        .header("Authorization", &format!("Bearer {TOKEN}"))
        .header("X-User-ID", "alice")
        .header("X-Workspace", "default")
        .header("X-Workspace-Root", root)
        .build();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let session = resp
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = body_json(resp).await;
    (status, session, body)
}

#[tokio::test]
async fn health_reports_session_count() {
    let (_guard, _tmp, state) = fresh_state();
    let app = build_router(state);
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let (_guard, _tmp, state) = fresh_state();
    let app = build_router(state);
    let req = post_mcp(rpc("tools/list", 1, json!({}))).build();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_bearer_is_unauthorized() {
    let (_guard, _tmp, state) = fresh_state();
    let app = build_router(state);
    let req = post_mcp(rpc("tools/list", 1, json!({})))
        .header("Authorization", "Bearer nope")
        .build();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn initialize_requires_user_header() {
    let (_guard, tmp, state) = fresh_state();
    let app = build_router(state);
    let req = post_mcp(rpc("initialize", 1, json!({})))
        .header("Authorization", &format!("Bearer {TOKEN}"))
        .header("X-Workspace-Root", &tmp.path().to_string_lossy())
        .build();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("X-User-ID"));
}

#[tokio::test]
async fn workspace_root_mismatch_names_both_values() {
    let (_guard, _tmp, state) = fresh_state();
    let app = build_router(state);
    let (status, _, body) = initialize(&app, "/somewhere/else").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("/somewhere/else"));
    assert!(error.contains("workspace root mismatch"));
}

#[tokio::test]
async fn initialize_creates_session_and_returns_header() {
    let (_guard, tmp, state) = fresh_state();
    let app = build_router(state.clone());
    let (status, session, body) = initialize(&app, &tmp.path().to_string_lossy()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session.is_some());
    assert_eq!(body["result"]["serverInfo"]["name"], "constellation-fs");
    assert_eq!(state.session_count(), 1);
}

#[tokio::test]
async fn tool_calls_require_a_known_session() {
    let (_guard, tmp, state) = fresh_state();
    let app = build_router(state);
    let _ = tmp;
    let req = post_mcp(rpc("tools/list", 2, json!({})))
        .header("Authorization", &format!("Bearer {TOKEN}"))
        .header(SESSION_HEADER, "no-such-session")
        .build();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Session not found");
}

#[tokio::test]
async fn full_session_flow_exec_and_close() {
    let (_guard, tmp, state) = fresh_state();
    let app = build_router(state.clone());
    let (_, session, _) = initialize(&app, &tmp.path().to_string_lossy()).await;
    let session = session.unwrap();

    // tools/list advertises the fixed set.
    let req = post_mcp(rpc("tools/list", 2, json!({})))
        .header("Authorization", &format!("Bearer {TOKEN}"))
        .header(SESSION_HEADER, &session)
        .build();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let tools: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(tools.contains(&"exec"));
    assert!(tools.contains(&"read_text_file"));
    assert!(tools.contains(&"directory_tree"));

    // exec through the session facade.
    let req = post_mcp(rpc(
        "tools/call",
        3,
        json!({"name": "exec", "arguments": {"command": "echo over http"}}),
    ))
    .header("Authorization", &format!("Bearer {TOKEN}"))
    .header(SESSION_HEADER, &session)
    .build();
    let resp = app.clone().oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["result"]["output"], "over http");

    // Dangerous command surfaces the typed error record.
    let req = post_mcp(rpc(
        "tools/call",
        4,
        json!({"name": "exec", "arguments": {"command": "rm -rf /"}}),
    ))
    .header("Authorization", &format!("Bearer {TOKEN}"))
    .header(SESSION_HEADER, &session)
    .build();
    let resp = app.clone().oneshot(req).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["error"]["data"]["code"], "DANGEROUS_OPERATION");
    assert_eq!(body["error"]["data"]["command"], "rm -rf /");

    // Close destroys the session.
    let req = post_mcp(rpc("session/close", 5, json!({})))
        .header("Authorization", &format!("Bearer {TOKEN}"))
        .header(SESSION_HEADER, &session)
        .build();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.session_count(), 0);
}

#[tokio::test]
async fn sessions_are_scoped_per_user() {
    let (_guard, tmp, state) = fresh_state();
    let app = build_router(state);
    let root = tmp.path().to_string_lossy().to_string();

    let init_as = |user: &str| {
        let req = post_mcp(rpc("initialize", 1, json!({})))
            .header("Authorization", &format!("Bearer {TOKEN}"))
            .header("X-User-ID", user)
            .header("X-Workspace-Root", &root)
            .build();
        let app = app.clone();
        async move {
            let resp = app.oneshot(req).await.unwrap();
            resp.headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap()
                .to_string()
        }
    };
    let alice = init_as("alice").await;
    let bob = init_as("bob").await;
    assert_ne!(alice, bob);

    // Alice writes; bob cannot see it.
    let write = post_mcp(rpc(
        "tools/call",
        2,
        json!({"name": "write_file", "arguments": {"path": "mine.txt", "content": "private"}}),
    ))
    .header("Authorization", &format!("Bearer {TOKEN}"))
    .header(SESSION_HEADER, &alice)
    .build();
    let resp = app.clone().oneshot(write).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let read = post_mcp(rpc(
        "tools/call",
        3,
        json!({"name": "read_text_file", "arguments": {"path": "mine.txt"}}),
    ))
    .header("Authorization", &format!("Bearer {TOKEN}"))
    .header(SESSION_HEADER, &bob)
    .build();
    let resp = app.clone().oneshot(read).await.unwrap();
    let body = body_json(resp).await;
    assert!(body["error"]["data"]["code"].as_str().is_some());
}

#[tokio::test]
async fn dispatch_handles_tool_calls_directly() {
    let (_guard, _tmp, _state) = fresh_state();
    let fs = FileSystem::new(FileSystemConfig::local("direct")).unwrap();
    let facade = fs.default_workspace().await.unwrap();

    let request = RpcRequest {
        jsonrpc: "2.0".to_string(),
        method: "tools/call".to_string(),
        id: Some(json!(1)),
        params: Some(json!({"name": "exec", "arguments": {"command": "echo direct"}})),
    };
    let response: RpcResponse = super::dispatch(&facade, &request).await.unwrap();
    assert_eq!(response.result.unwrap()["output"], "direct");

    // Notifications get no response.
    let notification = RpcRequest {
        jsonrpc: "2.0".to_string(),
        method: "initialized".to_string(),
        id: None,
        params: None,
    };
    assert!(super::dispatch(&facade, &notification).await.is_none());
}
