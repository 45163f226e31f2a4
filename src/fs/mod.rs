pub mod workspace;

use crate::backend::local::LocalExecutor;
use crate::backend::remote::RemoteExecutor;
use crate::backend::{DangerHandler, Executor};
use crate::config::{BackendConfig, FileSystemConfig, WorkspaceOptions, get_settings};
use crate::errors::FsResult;
use crate::workspace::{DEFAULT_WORKSPACE, validate_user_id, validate_workspace_name};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub use workspace::{LsResult, Workspace};

/// Per-user router: owns the executor for its backend and hands out cached
/// workspace facades. Construction reads the process-wide settings, so those
/// must be initialized first.
pub struct FileSystem {
    user_id: String,
    user_root: PathBuf,
    executor: Arc<dyn Executor>,
    cache: Mutex<HashMap<String, Arc<Workspace>>>,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("user_id", &self.user_id)
            .field("user_root", &self.user_root)
            .finish()
    }
}

impl FileSystem {
    pub fn new(config: FileSystemConfig) -> FsResult<Self> {
        Self::with_danger_handler(config, None)
    }

    /// Construct with an optional dangerous-operation handler. When set, the
    /// handler is invoked for dangerous/privileged commands and the call
    /// returns empty output instead of failing.
    pub fn with_danger_handler(
        config: FileSystemConfig,
        on_dangerous: Option<DangerHandler>,
    ) -> FsResult<Self> {
        validate_user_id(&config.user_id)?;
        let settings = get_settings()?;

        let executor: Arc<dyn Executor> = match &config.backend {
            BackendConfig::Local(local) => Arc::new(LocalExecutor::new(
                local,
                config.max_output_length,
                on_dangerous,
            )?),
            BackendConfig::Remote(remote) => Arc::new(RemoteExecutor::new(
                remote.clone(),
                config.max_output_length,
                on_dangerous,
            )),
        };

        let user_root = settings
            .workspace_root
            .join(&settings.app_id)
            .join(&config.user_id);
        info!(user_id = %config.user_id, root = %user_root.display(), "filesystem created");

        Ok(Self {
            user_id: config.user_id,
            user_root,
            executor,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The per-user root: `<workspace_root>/<app_id>/<user_id>`.
    pub fn user_root(&self) -> &PathBuf {
        &self.user_root
    }

    /// The `default` workspace.
    pub async fn default_workspace(&self) -> FsResult<Arc<Workspace>> {
        self.workspace(DEFAULT_WORKSPACE, None).await
    }

    /// A named workspace, created on site if needed. Facades are cached;
    /// distinct custom environments produce distinct facades.
    pub async fn workspace(
        &self,
        name: &str,
        options: Option<WorkspaceOptions>,
    ) -> FsResult<Arc<Workspace>> {
        validate_workspace_name(name)?;
        let env = options.and_then(|o| o.env);
        let key = cache_key(name, env.as_ref());

        if let Some(existing) = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Ok(existing.clone());
        }

        let path = self.user_root.join(name);
        self.executor.ensure_workspace(&path).await?;
        debug!(name, path = %path.display(), "workspace ready");

        let ws = Arc::new(Workspace::new(
            name.to_string(),
            path,
            env,
            self.executor.clone(),
        ));
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, ws.clone());
        Ok(ws)
    }

    /// Names of workspaces that exist on site for this user.
    pub async fn list_workspaces(&self) -> FsResult<Vec<String>> {
        self.executor.list_workspaces(&self.user_root).await
    }

    /// Clear the cache and release the execution site (remote routers end
    /// their channel). Facades handed out earlier keep working only for
    /// local backends; treat this as the end of the router's life.
    pub async fn destroy(&self) {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        self.executor.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn cached_count(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

/// Cache key: the plain name, or `name:<sha256>` over the sorted env pairs
/// when a custom environment is attached.
fn cache_key(name: &str, env: Option<&HashMap<String, String>>) -> String {
    let Some(env) = env else {
        return name.to_string();
    };
    if env.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<_> = env.iter().collect();
    pairs.sort();
    let mut hasher = Sha256::new();
    for (k, v) in pairs {
        hasher.update(k.as_bytes());
        hasher.update([0]);
        hasher.update(v.as_bytes());
        hasher.update([0]);
    }
    format!("{name}:{}", hex::encode(hasher.finalize()))
}
