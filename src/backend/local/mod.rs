use crate::backend::{
    DangerHandler, DirEntry, Encoding, Executor, FileKind, FileStat, GuardOutcome, Output, env,
    guard_command, output,
};
use crate::config::{LocalBackendConfig, debug_logging_enabled};
use crate::errors::{ConstellationError, FsResult};
use crate::workspace::paths::{resolve_safely, symlink_safety};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Host-subprocess execution site. Every command runs under the detected
/// shell with a scrubbed environment, cwd pinned to the workspace.
pub struct LocalExecutor {
    shell: String,
    max_output_length: Option<usize>,
    on_dangerous: Option<DangerHandler>,
}

/// `bash` when available, else `sh`.
pub fn detect_shell() -> FsResult<String> {
    for candidate in ["bash", "sh"] {
        if which::which(candidate).is_ok() {
            return Ok(candidate.to_string());
        }
    }
    Err(ConstellationError::MissingUtilities(
        "no POSIX shell found (tried bash, sh)".to_string(),
    ))
}

impl LocalExecutor {
    pub fn new(
        config: &LocalBackendConfig,
        max_output_length: Option<usize>,
        on_dangerous: Option<DangerHandler>,
    ) -> FsResult<Self> {
        let shell = match &config.shell {
            Some(shell) => shell.clone(),
            None => detect_shell()?,
        };
        Ok(Self {
            shell,
            max_output_length,
            on_dangerous,
        })
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Resolve a relative path for reading: validator plus symlink walk over
    /// the path itself.
    fn resolve_for_read(&self, workspace: &Path, rel_path: &str) -> FsResult<PathBuf> {
        let resolved = resolve_safely(workspace, rel_path)?;
        symlink_safety(workspace, &resolved)?;
        Ok(resolved)
    }

    /// Resolve a relative path for writing: the symlink walk covers the
    /// parent, since the leaf may not exist yet.
    fn resolve_for_write(&self, workspace: &Path, rel_path: &str) -> FsResult<PathBuf> {
        let resolved = resolve_safely(workspace, rel_path)?;
        let parent = resolved.parent().unwrap_or(workspace);
        symlink_safety(workspace, parent)?;
        Ok(resolved)
    }
}

fn kind_of(meta: &std::fs::Metadata) -> FileKind {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::File
    } else if ft.is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::Other
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn exec(
        &self,
        workspace: &Path,
        command: &str,
        encoding: Encoding,
        custom_env: Option<&HashMap<String, String>>,
    ) -> FsResult<Output> {
        match guard_command(command, workspace, self.on_dangerous.as_ref())? {
            GuardOutcome::Proceed => {}
            GuardOutcome::SuppressEmpty => {
                return Ok(match encoding {
                    Encoding::Utf8 => Output::Text(String::new()),
                    Encoding::Buffer => Output::Bytes(Vec::new()),
                });
            }
        }

        let custom_entries = match custom_env {
            Some(env) => env::validate_custom_env(env)?,
            None => Vec::new(),
        };

        // The scrubbed TMPDIR points here; make sure it exists.
        let _ = tokio::fs::create_dir_all(workspace.join(".tmp")).await;

        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.env_clear();
        for (name, value) in env::base_env(workspace, &self.shell) {
            cmd.env(name, value);
        }
        for (name, value) in &custom_entries {
            cmd.env(name, value);
        }
        cmd.arg("-c").arg(command);
        cmd.current_dir(workspace);
        cmd.kill_on_drop(true);

        let result = cmd.output().await.map_err(|e| ConstellationError::ExecError {
            message: format!("failed to spawn {}: {e}", self.shell),
            command: Some(command.to_string()),
        })?;

        if debug_logging_enabled() {
            debug!(
                command,
                status = ?result.status.code(),
                stdout = %output::log_preview(&result.stdout),
                stderr = %output::log_preview(&result.stderr),
                "local exec finished"
            );
        }

        if result.status.success() {
            return Ok(match encoding {
                Encoding::Utf8 => Output::Text(output::finish_exec_text(
                    &result.stdout,
                    self.max_output_length,
                )),
                Encoding::Buffer => Output::Bytes(result.stdout),
            });
        }

        let detail = if result.stderr.is_empty() {
            String::from_utf8_lossy(&result.stdout).trim_end().to_string()
        } else {
            String::from_utf8_lossy(&result.stderr).trim_end().to_string()
        };
        let status = result
            .status
            .code()
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
        Err(ConstellationError::ExecFailed {
            message: format!("{status}: {detail}"),
            command: Some(command.to_string()),
        })
    }

    async fn read_file(
        &self,
        workspace: &Path,
        rel_path: &str,
        encoding: Option<Encoding>,
    ) -> FsResult<Output> {
        let resolved = self.resolve_for_read(workspace, rel_path)?;
        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ConstellationError::ReadFailed {
                message: e.to_string(),
                path: rel_path.to_string(),
            })?;
        Ok(match encoding {
            Some(Encoding::Utf8) => Output::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Some(Encoding::Buffer) | None => Output::Bytes(bytes),
        })
    }

    async fn write_file(&self, workspace: &Path, rel_path: &str, content: &[u8]) -> FsResult<()> {
        let resolved = self.resolve_for_write(workspace, rel_path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConstellationError::WriteFailed {
                    message: format!("cannot create parent directories: {e}"),
                    path: rel_path.to_string(),
                })?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ConstellationError::WriteFailed {
                message: e.to_string(),
                path: rel_path.to_string(),
            })
    }

    async fn mkdir(&self, workspace: &Path, rel_path: &str, recursive: bool) -> FsResult<()> {
        let resolved = self.resolve_for_write(workspace, rel_path)?;
        let result = if recursive {
            tokio::fs::create_dir_all(&resolved).await
        } else {
            tokio::fs::create_dir(&resolved).await
        };
        result.map_err(|e| ConstellationError::WriteFailed {
            message: e.to_string(),
            path: rel_path.to_string(),
        })
    }

    async fn touch(&self, workspace: &Path, rel_path: &str) -> FsResult<()> {
        let resolved = self.resolve_for_write(workspace, rel_path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConstellationError::WriteFailed {
                    message: format!("cannot create parent directories: {e}"),
                    path: rel_path.to_string(),
                })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&resolved)
            .map_err(|e| ConstellationError::WriteFailed {
                message: e.to_string(),
                path: rel_path.to_string(),
            })?;
        // Existing files get a fresh mtime; content is untouched.
        let _ = file.set_modified(std::time::SystemTime::now());
        Ok(())
    }

    async fn stat(&self, workspace: &Path, rel_path: &str) -> FsResult<FileStat> {
        let resolved = self.resolve_for_read(workspace, rel_path)?;
        let meta = std::fs::symlink_metadata(&resolved).map_err(|e| {
            ConstellationError::ReadFailed {
                message: e.to_string(),
                path: rel_path.to_string(),
            }
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        Ok(FileStat {
            kind: kind_of(&meta),
            size: meta.len(),
            mtime,
        })
    }

    async fn list_dir(&self, workspace: &Path, rel_path: &str) -> FsResult<Vec<DirEntry>> {
        let resolved = self.resolve_for_read(workspace, rel_path)?;
        let mut entries = Vec::new();
        let mut read_dir =
            tokio::fs::read_dir(&resolved)
                .await
                .map_err(|e| ConstellationError::LsFailed {
                    message: e.to_string(),
                    path: rel_path.to_string(),
                })?;
        while let Some(entry) =
            read_dir
                .next_entry()
                .await
                .map_err(|e| ConstellationError::LsFailed {
                    message: e.to_string(),
                    path: rel_path.to_string(),
                })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let kind = entry
                .metadata()
                .await
                .map_or(FileKind::Other, |meta| kind_of(&meta));
            entries.push(DirEntry { name, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, workspace: &Path, rel_path: &str) -> FsResult<bool> {
        let resolved = self.resolve_for_read(workspace, rel_path)?;
        Ok(tokio::fs::try_exists(&resolved).await.unwrap_or(false))
    }

    async fn delete_tree(&self, workspace: &Path) -> FsResult<()> {
        match tokio::fs::remove_dir_all(workspace).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConstellationError::WriteFailed {
                message: e.to_string(),
                path: workspace.display().to_string(),
            }),
        }
    }

    async fn ensure_workspace(&self, workspace: &Path) -> FsResult<()> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|e| ConstellationError::WriteFailed {
                message: e.to_string(),
                path: workspace.display().to_string(),
            })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(workspace, std::fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    async fn list_workspaces(&self, user_root: &Path) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(user_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(ConstellationError::LsFailed {
                    message: e.to_string(),
                    path: user_root.display().to_string(),
                });
            }
        };
        while let Some(entry) =
            read_dir
                .next_entry()
                .await
                .map_err(|e| ConstellationError::LsFailed {
                    message: e.to_string(),
                    path: user_root.display().to_string(),
                })?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests;
