pub mod env;
pub mod local;
pub mod output;
pub mod remote;

use crate::errors::{ConstellationError, FsResult};
use crate::safety;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// How exec output is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Buffer,
}

/// Exec/read result: decoded text or raw bytes, matching the requested
/// encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Text(String),
    Bytes(Vec<u8>),
}

impl Output {
    pub fn into_text(self) -> String {
        match self {
            Output::Text(s) => s,
            Output::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Output::Text(s) => s.into_bytes(),
            Output::Bytes(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Stat result: `{kind, size, mtime}` with mtime as seconds since the epoch.
#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub kind: FileKind,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Callback invoked instead of failing when a dangerous operation is caught
/// and the caller opted into handling it.
pub type DangerHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of the pre-exec safety gate.
pub(crate) enum GuardOutcome {
    Proceed,
    /// The dangerous-op handler ran; the operation returns empty output.
    SuppressEmpty,
}

/// Run the safety analyzer over a command and translate the verdict.
///
/// The handler, when configured, suppresses only the dangerous/privileged
/// classes; network, escape, and invalid-path verdicts always fail.
pub(crate) fn guard_command(
    command: &str,
    workspace: &Path,
    on_dangerous: Option<&DangerHandler>,
) -> FsResult<GuardOutcome> {
    if command.trim().is_empty() {
        return Err(ConstellationError::EmptyCommand);
    }
    let (verdict, parsed) = safety::analyze(command, workspace);
    match &verdict {
        safety::SafetyVerdict::Safe => Ok(GuardOutcome::Proceed),
        safety::SafetyVerdict::Unsafe { reason, kind } => match kind {
            safety::VerdictKind::Dangerous | safety::VerdictKind::PrivilegedCommand
                if on_dangerous.is_some() =>
            {
                warn!(command, reason = %reason, "dangerous operation intercepted by handler");
                if let Some(handler) = on_dangerous {
                    handler(command);
                }
                Ok(GuardOutcome::SuppressEmpty)
            }
            _ => Err(safety::verdict_to_error(command, &verdict, &parsed, workspace)),
        },
    }
}

/// The capability set every execution site implements. The router and facade
/// consume only this surface; local and remote are interchangeable behind it.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn exec(
        &self,
        workspace: &Path,
        command: &str,
        encoding: Encoding,
        custom_env: Option<&HashMap<String, String>>,
    ) -> FsResult<Output>;

    /// Read a workspace-relative file. With an encoding the bytes are decoded
    /// (file reads are never right-trimmed); without, raw bytes come back.
    async fn read_file(
        &self,
        workspace: &Path,
        rel_path: &str,
        encoding: Option<Encoding>,
    ) -> FsResult<Output>;

    async fn write_file(&self, workspace: &Path, rel_path: &str, content: &[u8]) -> FsResult<()>;

    async fn mkdir(&self, workspace: &Path, rel_path: &str, recursive: bool) -> FsResult<()>;

    async fn touch(&self, workspace: &Path, rel_path: &str) -> FsResult<()>;

    async fn stat(&self, workspace: &Path, rel_path: &str) -> FsResult<FileStat>;

    async fn list_dir(&self, workspace: &Path, rel_path: &str) -> FsResult<Vec<DirEntry>>;

    async fn exists(&self, workspace: &Path, rel_path: &str) -> FsResult<bool>;

    /// Remove the whole workspace tree.
    async fn delete_tree(&self, workspace: &Path) -> FsResult<()>;

    /// Create the workspace directory (restrictive permissions where the
    /// platform supports them). Called by the router on first use.
    async fn ensure_workspace(&self, workspace: &Path) -> FsResult<()>;

    /// Names of workspaces under one user root.
    async fn list_workspaces(&self, user_root: &Path) -> FsResult<Vec<String>>;

    /// Release site resources (the remote channel). Local is a no-op.
    async fn shutdown(&self) {}
}
