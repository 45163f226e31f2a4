pub mod http;
pub mod protocol;
pub mod stdio;
pub mod tools;

use crate::fs::Workspace;
use protocol::{METHOD_NOT_FOUND, RpcRequest, RpcResponse};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Protocol revision advertised at initialize.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// The initialize result body shared by both transports.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": "constellation-fs",
            "version": crate::VERSION,
        },
        "capabilities": {"tools": {}}
    })
}

/// Dispatch one parsed request against a facade. Session management
/// (initialize/close) is transport-specific and handled before this point;
/// everything here is facade-scoped.
pub async fn dispatch(facade: &Arc<Workspace>, request: &RpcRequest) -> Option<RpcResponse> {
    let id = request.id.clone()?;
    debug!(method = %request.method, "dispatching tool request");

    let response = match request.method.as_str() {
        "initialize" => RpcResponse::success(id, initialize_result()),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => RpcResponse::success(id, json!({"tools": tools::tool_definitions()})),
        "tools/call" => {
            let params = request.params.clone().unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            if name.is_empty() {
                return Some(RpcResponse::failure(
                    id,
                    protocol::INVALID_PARAMS,
                    "tools/call requires a tool name",
                ));
            }
            match tools::call_tool(facade, name, &arguments).await {
                Ok(result) => RpcResponse::success(id, result),
                Err(e) => RpcResponse::tool_failure(id, &e),
            }
        }
        other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("unknown method '{other}'")),
    };
    Some(response)
}

#[cfg(test)]
mod tests;
