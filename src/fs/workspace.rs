use crate::backend::{DirEntry, Encoding, Executor, FileStat, Output};
use crate::errors::FsResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Listing result: bare names, or entries with kinds when details were
/// requested.
#[derive(Debug, Clone)]
pub enum LsResult {
    Names(Vec<String>),
    Details(Vec<DirEntry>),
}

/// Per-(user, workspace) facade: the operation surface agents see. All path
/// arguments are workspace-relative and validated by the executor; the
/// custom environment rides along on every exec.
pub struct Workspace {
    name: String,
    path: PathBuf,
    env: Option<HashMap<String, String>>,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("env", &self.env)
            .finish()
    }
}

impl Workspace {
    pub(crate) fn new(
        name: String,
        path: PathBuf,
        env: Option<HashMap<String, String>>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            name,
            path,
            env,
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute workspace path on the execution site.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a shell command, returning decoded (trimmed, capped) stdout.
    pub async fn exec(&self, command: &str) -> FsResult<String> {
        let out = self
            .executor
            .exec(&self.path, command, Encoding::Utf8, self.env.as_ref())
            .await?;
        Ok(out.into_text())
    }

    /// Run a shell command, returning raw stdout bytes (no trim, no cap).
    /// Local backend only.
    pub async fn exec_buffer(&self, command: &str) -> FsResult<Vec<u8>> {
        let out = self
            .executor
            .exec(&self.path, command, Encoding::Buffer, self.env.as_ref())
            .await?;
        Ok(out.into_bytes())
    }

    /// Read a file as UTF-8 text.
    pub async fn read(&self, path: &str) -> FsResult<String> {
        let out = self
            .executor
            .read_file(&self.path, path, Some(Encoding::Utf8))
            .await?;
        Ok(out.into_text())
    }

    /// Read with an explicit encoding; `None` returns raw bytes.
    pub async fn read_file(&self, path: &str, encoding: Option<Encoding>) -> FsResult<Output> {
        self.executor.read_file(&self.path, path, encoding).await
    }

    /// Write UTF-8 text, creating parent directories as needed.
    pub async fn write(&self, path: &str, content: &str) -> FsResult<()> {
        self.executor
            .write_file(&self.path, path, content.as_bytes())
            .await
    }

    /// Write raw bytes, creating parent directories as needed.
    pub async fn write_file(&self, path: &str, content: &[u8]) -> FsResult<()> {
        self.executor.write_file(&self.path, path, content).await
    }

    pub async fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        self.executor.mkdir(&self.path, path, recursive).await
    }

    pub async fn touch(&self, path: &str) -> FsResult<()> {
        self.executor.touch(&self.path, path).await
    }

    pub async fn stat(&self, path: &str) -> FsResult<FileStat> {
        self.executor.stat(&self.path, path).await
    }

    /// List workspace contents. With a pattern the expansion happens on the
    /// execution site (`ls -1 <pattern>`), so quoting discipline is the
    /// caller's; with `details` each entry carries its kind.
    pub async fn ls(&self, pattern: Option<&str>, details: bool) -> FsResult<LsResult> {
        match pattern {
            None => {
                let entries = self.executor.list_dir(&self.path, ".").await?;
                if details {
                    Ok(LsResult::Details(entries))
                } else {
                    Ok(LsResult::Names(entries.into_iter().map(|e| e.name).collect()))
                }
            }
            Some(pattern) => {
                let out = self.exec(&format!("ls -1 {pattern}")).await?;
                let names: Vec<String> = out.lines().map(str::to_string).collect();
                if !details {
                    return Ok(LsResult::Names(names));
                }
                let mut entries = Vec::with_capacity(names.len());
                for name in names {
                    let kind = self
                        .executor
                        .stat(&self.path, &name)
                        .await
                        .map(|s| s.kind)
                        .unwrap_or(crate::backend::FileKind::Other);
                    entries.push(DirEntry { name, kind });
                }
                Ok(LsResult::Details(entries))
            }
        }
    }

    /// All entries in the workspace root, with kinds.
    pub async fn list(&self) -> FsResult<Vec<DirEntry>> {
        self.executor.list_dir(&self.path, ".").await
    }

    /// List a workspace-relative directory, with kinds.
    pub async fn list_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.executor.list_dir(&self.path, path).await
    }

    /// Whether the workspace directory itself exists on site.
    pub async fn exists(&self) -> bool {
        self.executor
            .exists(&self.path, ".")
            .await
            .unwrap_or(false)
    }

    /// Whether a member path exists.
    pub async fn file_exists(&self, path: &str) -> FsResult<bool> {
        self.executor.exists(&self.path, path).await
    }

    /// Remove the workspace tree on site. The facade stays usable; the next
    /// write recreates directories as needed.
    pub async fn delete(&self) -> FsResult<()> {
        self.executor.delete_tree(&self.path).await
    }
}
