use crate::errors::{ConstellationError, FsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration for one `FileSystem` instance.
///
/// The backend is a tagged variant so the factory can dispatch without
/// downcasting; everything the executor needs travels inside the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Owning user. Validated against the workspace identifier rules.
    #[serde(rename = "userId")]
    pub user_id: String,

    #[serde(flatten)]
    pub backend: BackendConfig,

    /// Cap applied to decoded exec stdout. `None` disables the cap.
    #[serde(default, rename = "maxOutputLength")]
    pub max_output_length: Option<usize>,
}

impl FileSystemConfig {
    /// Local-backend config with defaults, the common construction in tests
    /// and the stdio server.
    pub fn local(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            backend: BackendConfig::Local(LocalBackendConfig::default()),
            max_output_length: None,
        }
    }
}

/// Which execution site commands are routed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local(LocalBackendConfig),
    Remote(RemoteBackendConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Shell override. When unset the executor detects `bash`, else `sh`.
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    /// Remote host. Authoritative when set; `REMOTE_VM_HOST` is only a
    /// fallback when host/port are absent.
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    pub auth: RemoteAuth,

    /// Per-operation timeout. The channel manager measures it from
    /// registration to completion.
    #[serde(default = "default_op_timeout_secs", rename = "opTimeoutSecs")]
    pub op_timeout_secs: u64,
}

fn default_op_timeout_secs() -> u64 {
    120
}

impl std::fmt::Debug for RemoteBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackendConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field("op_timeout_secs", &self.op_timeout_secs)
            .finish()
    }
}

/// Credentials for the remote channel. Two modes: password (with
/// keyboard-interactive fallback) and private key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RemoteAuth {
    Password {
        #[serde(default)]
        username: Option<String>,
        password: String,
    },
    Key {
        #[serde(default)]
        username: Option<String>,
        #[serde(rename = "privateKey")]
        private_key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl RemoteAuth {
    /// The username to authenticate as. Falls back to the host `USER`
    /// variable when the credentials omit it (legacy behavior).
    pub fn resolve_username(&self) -> FsResult<String> {
        let configured = match self {
            RemoteAuth::Password { username, .. } | RemoteAuth::Key { username, .. } => {
                username.clone()
            }
        };
        configured
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ConstellationError::InvalidConfiguration(
                    "remote credentials must include a username".to_string(),
                )
            })
    }
}

impl std::fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteAuth::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            RemoteAuth::Key {
                username,
                passphrase,
                ..
            } => f
                .debug_struct("Key")
                .field("username", username)
                .field("private_key", &"[REDACTED]")
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Per-workspace options accepted by `FileSystem::workspace`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceOptions {
    /// Extra environment applied to every exec in this workspace. Subject to
    /// the blocklist and value validation in `backend::env`.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

/// Parse `REMOTE_VM_HOST` in its strict `user@host:port` shape.
///
/// An absent variable and a malformed value both map to
/// `BACKEND_NOT_IMPLEMENTED`; the malformed case carries the offending value.
pub fn parse_remote_vm_host(value: Option<&str>) -> FsResult<(String, String, u16)> {
    let raw = value.ok_or_else(|| {
        ConstellationError::BackendNotImplemented(
            "remote backend requires host/port config or REMOTE_VM_HOST".to_string(),
        )
    })?;

    let bad = |raw: &str| {
        ConstellationError::BackendNotImplemented(format!(
            "REMOTE_VM_HOST must be user@host:port, got '{raw}'"
        ))
    };

    let (user, rest) = raw.split_once('@').ok_or_else(|| bad(raw))?;
    let (host, port) = rest.split_once(':').ok_or_else(|| bad(raw))?;
    if user.is_empty() || host.is_empty() {
        return Err(bad(raw));
    }
    let port: u16 = port.parse().map_err(|_| bad(raw))?;
    Ok((user.to_string(), host.to_string(), port))
}
