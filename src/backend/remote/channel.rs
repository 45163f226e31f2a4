use crate::config::{RemoteAuth, RemoteBackendConfig, parse_remote_vm_host};
use crate::errors::{ConstellationError, FsResult};
use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Application-level keep-alive cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Unanswered keep-alives before the peer is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Observable channel lifecycle. Losses always return to `Disconnected`;
/// every reconnect builds a fresh connection (channels are single-shot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// russh client callbacks. Host key pinning is the deployment's concern; the
/// channel only ever dials the configured host.
pub struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One in-flight operation registered against the channel, rejectable when
/// the connection drops.
struct PendingOp {
    description: String,
    reject: oneshot::Sender<String>,
}

/// Registry of in-flight operations. Each op races its own work against a
/// per-op timeout and the drain signal; whichever fires first wins and the
/// others become no-ops, so an op can never resolve twice.
pub struct PendingOps {
    next_id: AtomicU64,
    ops: Mutex<HashMap<u64, PendingOp>>,
}

/// Untracks its operation when dropped.
pub struct PendingGuard {
    ops: Arc<PendingOps>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.ops
            .ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl PendingOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            ops: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(self: &Arc<Self>, description: &str) -> (PendingGuard, oneshot::Receiver<String>) {
        let (reject, cancel) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                id,
                PendingOp {
                    description: description.to_string(),
                    reject,
                },
            );
        (
            PendingGuard {
                ops: self.clone(),
                id,
            },
            cancel,
        )
    }

    /// Reject every registered operation with a shared reason.
    pub fn drain(&self, why: &str) {
        let drained: Vec<PendingOp> = self
            .ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain()
            .map(|(_, op)| op)
            .collect();
        for op in drained {
            debug!(description = %op.description, why, "rejecting pending operation");
            let _ = op.reject.send(why.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `work` as a registered operation: first of {completion, per-op
    /// timeout, drain} wins. Returns the work's output untouched on
    /// completion so callers keep their own error types.
    pub async fn run<T>(
        self: &Arc<Self>,
        description: &str,
        timeout: Duration,
        work: impl Future<Output = T>,
    ) -> FsResult<T> {
        let (guard, mut cancel) = self.register(description);
        let result = tokio::select! {
            out = work => Ok(out),
            why = &mut cancel => {
                let why = why.unwrap_or_else(|_| "channel closed".to_string());
                Err(ConstellationError::connection_lost(description, &why))
            }
            () = tokio::time::sleep(timeout) => Err(ConstellationError::ExecFailed {
                message: format!("operation timed out after {}s", timeout.as_secs()),
                command: Some(description.to_string()),
            }),
        };
        drop(guard);
        result
    }
}

/// Owns the single authenticated SSH connection for one router. Connects
/// lazily on first use; a lost connection drains the pending set and the next
/// operation reconnects from scratch.
pub struct ChannelManager {
    config: RemoteBackendConfig,
    state: tokio::sync::Mutex<Option<Arc<client::Handle<ClientHandler>>>>,
    status: AtomicU8,
    pending: Arc<PendingOps>,
}

impl ChannelManager {
    pub fn new(config: RemoteBackendConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(None),
            status: AtomicU8::new(ChannelState::Disconnected as u8),
            pending: PendingOps::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        match self.status.load(Ordering::SeqCst) {
            2 => ChannelState::Connected,
            1 => ChannelState::Connecting,
            _ => ChannelState::Disconnected,
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.status.store(state as u8, Ordering::SeqCst);
    }

    pub fn pending(&self) -> &Arc<PendingOps> {
        &self.pending
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.config.op_timeout_secs)
    }

    /// Host, port, and the username fallback from `REMOTE_VM_HOST` when the
    /// config fields are absent. Config fields are authoritative.
    fn resolve_target(&self) -> FsResult<(String, u16, Option<String>)> {
        if let Some(host) = &self.config.host {
            return Ok((host.clone(), self.config.port.unwrap_or(22), None));
        }
        let env = std::env::var("REMOTE_VM_HOST").ok();
        let (user, host, port) = parse_remote_vm_host(env.as_deref())?;
        Ok((host, port, Some(user)))
    }

    fn resolve_username(&self, env_user: Option<String>) -> FsResult<String> {
        match self.config.auth.resolve_username() {
            Ok(user) => Ok(user),
            Err(e) => env_user.ok_or(e),
        }
    }

    /// The live connection handle, establishing one if needed. The state
    /// mutex serializes this: when a connect is in flight, concurrent callers
    /// queue here and observe its outcome instead of dialing again.
    pub async fn connection(&self) -> FsResult<Arc<client::Handle<ClientHandler>>> {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.as_ref() {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            // Stale handle from a dead peer; rebuild below.
            *state = None;
        }

        self.set_state(ChannelState::Connecting);
        match self.establish().await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *state = Some(handle.clone());
                self.set_state(ChannelState::Connected);
                Ok(handle)
            }
            Err(e) => {
                *state = None;
                self.set_state(ChannelState::Disconnected);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> FsResult<client::Handle<ClientHandler>> {
        let (host, port, env_user) = self.resolve_target()?;
        let username = self.resolve_username(env_user)?;
        info!(%host, port, %username, "connecting to remote execution site");

        let ssh_config = Arc::new(client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..client::Config::default()
        });

        let mut handle = client::connect(ssh_config, (host.as_str(), port), ClientHandler)
            .await
            .map_err(|e| ConstellationError::ExecFailed {
                message: format!("failed to connect to {host}:{port}: {e}"),
                command: None,
            })?;

        self.authenticate(&mut handle, &username).await?;
        info!(%host, port, "remote channel established");
        Ok(handle)
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> FsResult<()> {
        let auth_failed =
            || ConstellationError::ExecFailed {
                message: format!("authentication failed for user '{username}'"),
                command: None,
            };
        let transport = |e: russh::Error| ConstellationError::ExecFailed {
            message: format!("authentication error: {e}"),
            command: None,
        };

        match &self.config.auth {
            RemoteAuth::Password { password, .. } => {
                let result = handle
                    .authenticate_password(username, password)
                    .await
                    .map_err(transport)?;
                if matches!(result, AuthResult::Success) {
                    return Ok(());
                }
                // Some peers only offer keyboard-interactive; answer every
                // prompt with the password.
                debug!("password auth refused, trying keyboard-interactive");
                let mut response = handle
                    .authenticate_keyboard_interactive_start(username, None)
                    .await
                    .map_err(transport)?;
                loop {
                    match response {
                        KeyboardInteractiveAuthResponse::Success => return Ok(()),
                        KeyboardInteractiveAuthResponse::Failure { .. } => {
                            return Err(auth_failed());
                        }
                        KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                            let answers = vec![password.clone(); prompts.len()];
                            response = handle
                                .authenticate_keyboard_interactive_respond(answers)
                                .await
                                .map_err(transport)?;
                        }
                    }
                }
            }
            RemoteAuth::Key {
                private_key,
                passphrase,
                ..
            } => {
                let key = decode_secret_key(private_key, passphrase.as_deref()).map_err(|e| {
                    ConstellationError::InvalidConfiguration(format!(
                        "cannot decode private key: {e}"
                    ))
                })?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(transport)?
                    .flatten();
                let result = handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(transport)?;
                if matches!(result, AuthResult::Success) {
                    Ok(())
                } else {
                    Err(auth_failed())
                }
            }
        }
    }

    /// Record a connection loss observed by an operation: transition to
    /// `Disconnected`, forget the handle, and drain everything pending. The
    /// next operation reconnects through the lazy path.
    pub async fn mark_connection_lost(&self, why: &str) {
        warn!(why, "remote channel lost");
        {
            let mut state = self.state.lock().await;
            *state = None;
        }
        self.set_state(ChannelState::Disconnected);
        self.pending.drain(why);
    }

    /// Run a channel operation under registration and the per-op timeout.
    pub async fn run_op<T>(&self, description: &str, work: impl Future<Output = T>) -> FsResult<T> {
        self.pending.run(description, self.op_timeout(), work).await
    }

    /// Graceful shutdown: end the connection and reject anything in flight.
    pub async fn close(&self) {
        let handle = {
            let mut state = self.state.lock().await;
            state.take()
        };
        if let Some(handle) = handle {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "shutdown", "en")
                .await;
        }
        self.set_state(ChannelState::Disconnected);
        self.pending.drain("channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[tokio::test]
    async fn completed_op_is_untracked() {
        let pending = PendingOps::new();
        let out = pending
            .run("exec: echo", Duration::from_secs(5), async { 42 })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn drain_rejects_in_flight_ops_with_reason() {
        let pending = PendingOps::new();
        let pending_clone = pending.clone();
        let task = tokio::spawn(async move {
            pending_clone
                .run("exec: sleep 60", Duration::from_secs(600), std::future::pending::<()>())
                .await
        });
        // Give the op a turn to register.
        tokio::task::yield_now().await;
        while pending.is_empty() {
            tokio::task::yield_now().await;
        }

        pending.drain("peer closed the connection");
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecFailed);
        assert!(err.to_string().contains("Connection lost: peer closed the connection"));
        assert_eq!(err.command(), Some("exec: sleep 60"));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn op_times_out_with_typed_error() {
        let pending = PendingOps::new();
        let err = pending
            .run("exec: sleep forever", Duration::from_secs(120), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecFailed);
        assert!(err.to_string().contains("timed out after 120s"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn completion_wins_over_later_drain() {
        let pending = PendingOps::new();
        let out = pending
            .run("exec: quick", Duration::from_secs(5), async { "done" })
            .await
            .unwrap();
        // Draining after completion is a no-op.
        pending.drain("too late");
        assert_eq!(out, "done");
    }

    #[tokio::test]
    async fn manager_starts_disconnected_and_tracks_loss() {
        let config = RemoteBackendConfig {
            host: Some("vm.example.com".into()),
            port: Some(22),
            auth: RemoteAuth::Password {
                username: Some("agent".into()),
                password: "pw".into(),
            },
            op_timeout_secs: 120,
        };
        let manager = ChannelManager::new(config);
        assert_eq!(manager.state(), ChannelState::Disconnected);

        manager.mark_connection_lost("keepalive exhausted").await;
        assert_eq!(manager.state(), ChannelState::Disconnected);
        assert!(manager.pending().is_empty());
    }

    #[tokio::test]
    async fn missing_host_and_env_is_backend_not_implemented() {
        let config = RemoteBackendConfig {
            host: None,
            port: None,
            auth: RemoteAuth::Password {
                username: Some("agent".into()),
                password: "pw".into(),
            },
            op_timeout_secs: 120,
        };
        let manager = ChannelManager::new(config);
        // REMOTE_VM_HOST is not set in the test environment.
        if std::env::var("REMOTE_VM_HOST").is_err() {
            let err = manager.resolve_target().unwrap_err();
            assert_eq!(err.code(), ErrorCode::BackendNotImplemented);
        }
    }

    #[tokio::test]
    async fn drain_handles_multiple_ops() {
        let pending = PendingOps::new();
        let mut tasks = Vec::new();
        for i in 0..3 {
            let p = pending.clone();
            tasks.push(tokio::spawn(async move {
                p.run(
                    &format!("exec: op-{i}"),
                    Duration::from_secs(600),
                    std::future::pending::<()>(),
                )
                .await
            }));
        }
        while pending.len() < 3 {
            tokio::task::yield_now().await;
        }
        pending.drain("connection reset");
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("Connection lost: connection reset"));
        }
    }
}
