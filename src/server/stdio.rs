//! Single-session stdio transport: one JSON request/response pair per line.
//! Protocol traffic owns stdout/stdin; diagnostics go to stderr through the
//! tracing subscriber.

use crate::fs::Workspace;
use crate::server::protocol::{PARSE_ERROR, RpcRequest, RpcResponse};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Serve one facade until stdin closes.
pub async fn serve(facade: Arc<Workspace>) -> Result<()> {
    info!(workspace = %facade.name(), "stdio tool server ready");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => crate::server::dispatch(&facade, &request).await,
            Err(e) => {
                debug!(error = %e, "unparseable request line");
                Some(RpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("invalid request: {e}"),
                ))
            }
        };
        // Notifications produce no response line.
        if let Some(response) = response {
            let mut payload = serde_json::to_vec(&response)?;
            payload.push(b'\n');
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        }
    }
    info!("stdin closed, stdio tool server exiting");
    Ok(())
}
