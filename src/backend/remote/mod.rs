pub mod channel;

use crate::backend::{
    DangerHandler, DirEntry, Encoding, Executor, FileKind, FileStat, GuardOutcome, Output, env,
    guard_command, output,
};
use crate::config::{RemoteBackendConfig, debug_logging_enabled};
use crate::errors::{ConstellationError, FsResult};
use crate::workspace::paths::resolve_safely;
use async_trait::async_trait;
use channel::ChannelManager;
use russh::ChannelMsg;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Exit codes used by the confinement preambles so the caller can tell a
/// missing path from an escaping one.
const EXIT_MISSING: u32 = 80;
const EXIT_ESCAPE: u32 = 81;

/// Remote execution site: every operation rides its own exec channel on the
/// manager's single connection.
pub struct RemoteExecutor {
    manager: Arc<ChannelManager>,
    max_output_length: Option<usize>,
    on_dangerous: Option<DangerHandler>,
}

/// Single-quote a string for the remote POSIX shell. Inner single quotes use
/// the `'\''` trick.
fn sq(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build a command that resolves `target` on the remote site (following
/// symlinks) and refuses to act unless the result stays inside `workspace`.
/// `$p` holds the resolved path for `action`.
fn confined(workspace: &str, target: &str, must_exist: bool, action: &str) -> String {
    let flag = if must_exist { "-e" } else { "-m" };
    format!(
        "t={target}; w={workspace}; p=$(realpath {flag} -- \"$t\") || exit {EXIT_MISSING}; \
         case \"$p\" in \"$w\"|\"$w\"/*) {action};; *) exit {EXIT_ESCAPE};; esac",
        target = sq(target),
        workspace = sq(workspace),
    )
}

struct RemoteOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: u32,
}

impl RemoteExecutor {
    pub fn new(
        config: RemoteBackendConfig,
        max_output_length: Option<usize>,
        on_dangerous: Option<DangerHandler>,
    ) -> Self {
        Self {
            manager: Arc::new(ChannelManager::new(config)),
            max_output_length,
            on_dangerous,
        }
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Open an exec channel, feed optional stdin, and collect output. The
    /// call is registered with the pending set and subject to the per-op
    /// timeout; transport errors mark the connection lost, which drains
    /// every other in-flight operation.
    async fn run_channel(
        &self,
        description: &str,
        command_line: &str,
        stdin: Option<Vec<u8>>,
    ) -> FsResult<RemoteOutput> {
        let handle = self.manager.connection().await?;

        let work = async {
            let mut channel = handle.channel_open_session().await?;
            channel.exec(true, command_line).await?;
            if let Some(data) = stdin {
                channel.data(&data[..]).await?;
                channel.eof().await?;
            }
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                        stderr.extend_from_slice(data);
                    }
                    ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                    _ => {}
                }
            }
            match status {
                Some(status) => Ok(RemoteOutput {
                    stdout,
                    stderr,
                    status,
                }),
                None => Err(russh::Error::Disconnect),
            }
        };

        let result = self.manager.run_op(description, work).await?;
        match result {
            Ok(out) => {
                if debug_logging_enabled() {
                    debug!(
                        description,
                        status = out.status,
                        stdout = %output::log_preview(&out.stdout),
                        stderr = %output::log_preview(&out.stderr),
                        "remote exec finished"
                    );
                }
                Ok(out)
            }
            Err(ssh_err) => {
                let why = ssh_err.to_string();
                self.manager.mark_connection_lost(&why).await;
                Err(ConstellationError::connection_lost(description, &why))
            }
        }
    }

    fn remote_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    /// Run a confined file operation and map the preamble's exit codes.
    async fn run_file_op(
        &self,
        description: &str,
        command_line: &str,
        stdin: Option<Vec<u8>>,
        rel_path: &str,
        on_error: fn(String, String) -> ConstellationError,
    ) -> FsResult<RemoteOutput> {
        let out = self.run_channel(description, command_line, stdin).await?;
        match out.status {
            0 => Ok(out),
            EXIT_MISSING => Err(on_error(
                "no such file or directory".to_string(),
                rel_path.to_string(),
            )),
            EXIT_ESCAPE => Err(ConstellationError::PathEscapeAttempt {
                path: rel_path.to_string(),
                reason: "resolves outside the workspace on the remote site".to_string(),
            }),
            status => {
                let detail = String::from_utf8_lossy(&out.stderr).trim_end().to_string();
                Err(on_error(format!("exit code {status}: {detail}"), rel_path.to_string()))
            }
        }
    }
}

fn read_err(message: String, path: String) -> ConstellationError {
    ConstellationError::ReadFailed { message, path }
}

fn write_err(message: String, path: String) -> ConstellationError {
    ConstellationError::WriteFailed { message, path }
}

fn ls_err(message: String, path: String) -> ConstellationError {
    ConstellationError::LsFailed { message, path }
}

#[async_trait]
impl Executor for RemoteExecutor {
    async fn exec(
        &self,
        workspace: &Path,
        command: &str,
        encoding: Encoding,
        custom_env: Option<&HashMap<String, String>>,
    ) -> FsResult<Output> {
        if encoding == Encoding::Buffer {
            return Err(ConstellationError::ExecError {
                message: "buffer encoding is not supported on the remote backend".to_string(),
                command: Some(command.to_string()),
            });
        }

        match guard_command(command, workspace, self.on_dangerous.as_ref())? {
            GuardOutcome::Proceed => {}
            GuardOutcome::SuppressEmpty => return Ok(Output::Text(String::new())),
        }

        let env_prefix = match custom_env {
            Some(env_map) => env::shell_env_prefix(&env::validate_custom_env(env_map)?),
            None => String::new(),
        };

        let workspace_str = Self::remote_str(workspace);
        let full = if workspace_str == "/" || workspace_str.is_empty() {
            format!("{env_prefix}{command}")
        } else {
            format!("cd \"{workspace_str}\" && {env_prefix}{command}")
        };

        let description = format!("exec: {command}");
        let out = self.run_channel(&description, &full, None).await?;

        if out.status == 0 {
            return Ok(Output::Text(output::finish_exec_text(
                &out.stdout,
                self.max_output_length,
            )));
        }
        let detail = if out.stderr.is_empty() {
            String::from_utf8_lossy(&out.stdout).trim_end().to_string()
        } else {
            String::from_utf8_lossy(&out.stderr).trim_end().to_string()
        };
        Err(ConstellationError::ExecFailed {
            message: format!("exit code {}: {detail}", out.status),
            command: Some(command.to_string()),
        })
    }

    async fn read_file(
        &self,
        workspace: &Path,
        rel_path: &str,
        encoding: Option<Encoding>,
    ) -> FsResult<Output> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            true,
            "cat -- \"$p\"",
        );
        let out = self
            .run_file_op(&format!("read: {rel_path}"), &cmd, None, rel_path, read_err)
            .await?;
        Ok(match encoding {
            // File reads are decoded but never right-trimmed.
            Some(Encoding::Utf8) => Output::Text(String::from_utf8_lossy(&out.stdout).into_owned()),
            Some(Encoding::Buffer) | None => Output::Bytes(out.stdout),
        })
    }

    async fn write_file(&self, workspace: &Path, rel_path: &str, content: &[u8]) -> FsResult<()> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            false,
            "mkdir -p -- \"$(dirname -- \"$p\")\" && cat > \"$p\"",
        );
        self.run_file_op(
            &format!("write: {rel_path}"),
            &cmd,
            Some(content.to_vec()),
            rel_path,
            write_err,
        )
        .await?;
        Ok(())
    }

    async fn mkdir(&self, workspace: &Path, rel_path: &str, recursive: bool) -> FsResult<()> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let action = if recursive {
            "mkdir -p -- \"$p\""
        } else {
            "mkdir -- \"$p\""
        };
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            false,
            action,
        );
        self.run_file_op(&format!("mkdir: {rel_path}"), &cmd, None, rel_path, write_err)
            .await?;
        Ok(())
    }

    async fn touch(&self, workspace: &Path, rel_path: &str) -> FsResult<()> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            false,
            "mkdir -p -- \"$(dirname -- \"$p\")\" && touch -- \"$p\"",
        );
        self.run_file_op(&format!("touch: {rel_path}"), &cmd, None, rel_path, write_err)
            .await?;
        Ok(())
    }

    async fn stat(&self, workspace: &Path, rel_path: &str) -> FsResult<FileStat> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            true,
            "stat -c '%F|%s|%Y' -- \"$p\"",
        );
        let out = self
            .run_file_op(&format!("stat: {rel_path}"), &cmd, None, rel_path, read_err)
            .await?;
        let text = String::from_utf8_lossy(&out.stdout);
        let mut parts = text.trim_end().splitn(3, '|');
        let kind = match parts.next().unwrap_or_default() {
            "regular file" | "regular empty file" => FileKind::File,
            "directory" => FileKind::Directory,
            "symbolic link" => FileKind::Symlink,
            _ => FileKind::Other,
        };
        let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let mtime = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(FileStat { kind, size, mtime })
    }

    async fn list_dir(&self, workspace: &Path, rel_path: &str) -> FsResult<Vec<DirEntry>> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            true,
            "ls -1Ap -- \"$p\"",
        );
        let out = self
            .run_file_op(&format!("ls: {rel_path}"), &cmd, None, rel_path, ls_err)
            .await?;
        let mut entries: Vec<DirEntry> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| match line.strip_suffix('/') {
                Some(name) => DirEntry {
                    name: name.to_string(),
                    kind: FileKind::Directory,
                },
                None => DirEntry {
                    name: line.to_string(),
                    kind: FileKind::File,
                },
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, workspace: &Path, rel_path: &str) -> FsResult<bool> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let cmd = confined(
            &Self::remote_str(workspace),
            &Self::remote_str(&resolved),
            true,
            ":",
        );
        let out = self
            .run_channel(&format!("exists: {rel_path}"), &cmd, None)
            .await?;
        match out.status {
            0 => Ok(true),
            EXIT_MISSING => Ok(false),
            EXIT_ESCAPE => Err(ConstellationError::PathEscapeAttempt {
                path: rel_path.to_string(),
                reason: "resolves outside the workspace on the remote site".to_string(),
            }),
            status => Err(ConstellationError::LsFailed {
                message: format!("exit code {status}"),
                path: rel_path.to_string(),
            }),
        }
    }

    async fn delete_tree(&self, workspace: &Path) -> FsResult<()> {
        let workspace_str = Self::remote_str(workspace);
        let cmd = format!("rm -rf -- {}", sq(&workspace_str));
        let out = self
            .run_channel(&format!("delete: {workspace_str}"), &cmd, None)
            .await?;
        if out.status == 0 {
            Ok(())
        } else {
            Err(ConstellationError::WriteFailed {
                message: format!("exit code {}", out.status),
                path: workspace_str,
            })
        }
    }

    async fn ensure_workspace(&self, workspace: &Path) -> FsResult<()> {
        let workspace_str = Self::remote_str(workspace);
        let cmd = format!(
            "mkdir -p -- {path} && chmod 700 -- {path}",
            path = sq(&workspace_str)
        );
        let out = self
            .run_channel(&format!("ensure: {workspace_str}"), &cmd, None)
            .await?;
        if out.status == 0 {
            Ok(())
        } else {
            Err(ConstellationError::WriteFailed {
                message: format!("exit code {}", out.status),
                path: workspace_str,
            })
        }
    }

    async fn list_workspaces(&self, user_root: &Path) -> FsResult<Vec<String>> {
        let root = Self::remote_str(user_root);
        let cmd = format!("ls -1Ap -- {} 2>/dev/null || true", sq(&root));
        let out = self.run_channel(&format!("ls: {root}"), &cmd, None).await?;
        let mut names: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.strip_suffix('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn shutdown(&self) {
        self.manager.close().await;
    }
}
