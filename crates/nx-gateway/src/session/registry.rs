//! Session registry
//!
//! Owns every live console session. Each session is an actor task holding
//! its backend exclusively; the registry only keeps a handle with the
//! session's command queue and cancellation token. Mutation is keyed per
//! session through the `DashMap`, so unrelated sessions never contend.
//!
//! # Lifecycle
//!
//! 1. `open_*` closes any session already using the key, builds the backend,
//!    registers the handle and sends `terminal:connected`
//! 2. the actor streams backend output as `terminal:data` and feeds input
//!    through the line guard
//! 3. close, backend exit, tunnel stop or a vanished client ends the actor,
//!    which terminates the backend, unregisters itself and sends
//!    `terminal:closed` (preceded by `terminal:error` on failure)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nx_core::config::SshConfig;
use nx_core::time::current_time_millis;
use nx_core::types::BackendKind;
use nx_core::{ConsoleError, NodeId};
use nx_protocol::{ConnectionId, Credential, ServerMessage, SessionKey, TerminalSize};

use super::backend::Backend;
use super::guard::LineGuard;
use super::local::LocalPty;
use super::ssh::{SshAuth, SshShell, SshTarget};
use super::utf8::Utf8Carry;
use crate::auth::IdentityStore;
use crate::settings::ConsoleSettings;
use crate::tunnel::TunnelRegistry;

/// Outbound half of a client channel
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// Input and resize commands queued per session
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Blocked commands are logged up to this many characters
const LOGGED_COMMAND_LEN: usize = 100;

/// Extra time allowed for an actor to finish after its backend grace period
const CLOSE_WAIT_SLACK: Duration = Duration::from_secs(1);

enum SessionCommand {
    Input(String),
    Resize(TerminalSize),
}

/// Why a session actor stopped
enum SessionEnd {
    /// Closed through the registry
    Closed,
    /// The shell or channel ended on its own
    Exited,
    /// The backend failed; the message goes to the client
    Failed(String),
    /// The client channel is gone, nobody to notify
    ClientGone,
}

struct SessionHandle {
    key: SessionKey,
    generation: u64,
    kind: BackendKind,
    node_id: Option<NodeId>,
    host: String,
    username: String,
    created_at: u64,
    last_activity: AtomicU64,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    fn touch(&self) {
        self.last_activity
            .store(current_time_millis(), Ordering::Relaxed);
    }

    fn reply_id(&self) -> Option<String> {
        reply_id(&self.key)
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.key.connection_id.to_string(),
            session_id: self.key.session_id.clone(),
            kind: self.kind,
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity.load(Ordering::Relaxed),
        }
    }
}

/// Session ID to tag outbound messages with. Legacy clients that never
/// named a session are keyed by their connection ID and get untagged messages.
fn reply_id(key: &SessionKey) -> Option<String> {
    if key.session_id == key.connection_id.as_str() {
        None
    } else {
        Some(key.session_id.clone())
    }
}

fn truncate_for_log(command: &str) -> String {
    command.chars().take(LOGGED_COMMAND_LEN).collect()
}

/// Snapshot of one session for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub connection_id: String,
    pub session_id: String,
    pub kind: BackendKind,
    pub node_id: Option<NodeId>,
    pub host: String,
    pub username: String,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis of the last input or output
    pub last_activity: u64,
}

/// Parameters for a direct SSH session
#[derive(Debug, Clone)]
pub struct DirectSshRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Option<Credential>,
    pub node_id: Option<NodeId>,
}

/// What `attach` needs besides the backend
struct Attachment {
    node_id: Option<NodeId>,
    host: String,
    username: String,
    message: String,
    tunnel: Option<CancellationToken>,
}

/// Registry of live console sessions
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionKey, Arc<SessionHandle>>>,
    settings: Arc<ConsoleSettings>,
    tunnels: Arc<TunnelRegistry>,
    identity: Arc<IdentityStore>,
    ssh: SshConfig,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        settings: Arc<ConsoleSettings>,
        tunnels: Arc<TunnelRegistry>,
        identity: Arc<IdentityStore>,
        ssh: SshConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            settings,
            tunnels,
            identity,
            ssh,
            next_generation: AtomicU64::new(1),
        }
    }

    fn initial_size(&self) -> TerminalSize {
        TerminalSize::new(self.ssh.cols, self.ssh.rows)
    }

    /// Open a shell on the gateway host
    pub async fn open_local(
        &self,
        key: SessionKey,
        node_id: Option<NodeId>,
        sink: OutboundSender,
    ) -> Result<SessionInfo, ConsoleError> {
        self.close_and_wait(&key).await;

        let size = self.initial_size();
        let term = self.ssh.term.clone();
        let pty = tokio::task::spawn_blocking(move || LocalPty::spawn(size, &term))
            .await
            .map_err(|e| ConsoleError::Spawn(format!("shell spawn task failed: {}", e)))
            .and_then(|spawned| spawned)
            .map_err(|e| {
                tracing::error!("Failed to start local shell for {}: {}", key, e);
                e
            })?;

        let attachment = Attachment {
            node_id,
            host: "localhost".to_string(),
            username: self.ssh.default_username.clone(),
            message: "Connected to local shell".to_string(),
            tunnel: None,
        };
        self.attach(key, Backend::LocalPty(pty), attachment, sink)
            .await
    }

    /// Open an SSH shell on a host
    pub async fn open_direct_ssh(
        &self,
        key: SessionKey,
        request: DirectSshRequest,
        sink: OutboundSender,
    ) -> Result<SessionInfo, ConsoleError> {
        self.close_and_wait(&key).await;

        let auth = SshAuth::from_credential(
            request.credential.as_ref(),
            self.identity.current().keypair(),
        )?;
        let target = SshTarget {
            host: request.host.clone(),
            port: request.port,
            username: request.username.clone(),
            auth,
        };
        let shell = SshShell::open(&target, self.initial_size(), &self.ssh).await?;

        let attachment = Attachment {
            node_id: request.node_id,
            message: format!("Connected to {}@{}", request.username, request.host),
            host: request.host,
            username: request.username,
            tunnel: None,
        };
        self.attach(key, Backend::DirectSsh(shell), attachment, sink)
            .await
    }

    /// Open an SSH shell on a node through its reverse tunnel
    pub async fn open_tunneled_ssh(
        &self,
        key: SessionKey,
        node_id: NodeId,
        sink: OutboundSender,
    ) -> Result<SessionInfo, ConsoleError> {
        let record = self
            .tunnels
            .get(&node_id)
            .ok_or_else(|| ConsoleError::NoTunnel(node_id.to_string()))?;
        let tunnel = self.tunnels.cancel_token(&node_id);

        self.close_and_wait(&key).await;

        let auth = SshAuth::from_credential(
            record.credential.as_ref(),
            self.identity.current().keypair(),
        )?;
        let username = self.tunnels.node_username().to_string();
        let target = SshTarget {
            host: "127.0.0.1".to_string(),
            port: record.local_port,
            username: username.clone(),
            auth,
        };
        let shell = SshShell::open(&target, self.initial_size(), &self.ssh).await?;

        let attachment = Attachment {
            message: format!("Connected to {}@{} via reverse tunnel", username, node_id),
            host: node_id.to_string(),
            node_id: Some(node_id),
            username,
            tunnel,
        };
        self.attach(key, Backend::TunneledSsh(shell), attachment, sink)
            .await
    }

    async fn attach(
        &self,
        key: SessionKey,
        backend: Backend,
        attachment: Attachment,
        sink: OutboundSender,
    ) -> Result<SessionInfo, ConsoleError> {
        let kind = backend.kind();
        let now = current_time_millis();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = Arc::new(SessionHandle {
            key: key.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            kind,
            node_id: attachment.node_id,
            host: attachment.host,
            username: attachment.username,
            created_at: now,
            last_activity: AtomicU64::new(now),
            commands,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        // Registered before the client hears about it, so input sent right
        // after `terminal:connected` is queued rather than dropped.
        // A concurrent open for the same key may have landed first.
        if let Some(previous) = self.sessions.insert(key.clone(), Arc::clone(&handle)) {
            tracing::debug!("Replacing session {}", key);
            previous.cancel.cancel();
        }

        let connected = ServerMessage::Connected {
            session_id: reply_id(&key),
            host: handle.host.clone(),
            username: handle.username.clone(),
            message: attachment.message,
        };
        if sink.send(connected).await.is_err() {
            tracing::debug!("Client for {} went away during connect", key);
            self.sessions
                .remove_if(&key, |_, current| current.generation == handle.generation);
            backend.terminate(self.ssh.close_grace).await;
            return Err(ConsoleError::UnknownSession(key.to_string()));
        }

        let actor = SessionActor {
            handle: Arc::clone(&handle),
            backend,
            commands: commands_rx,
            sink,
            sessions: Arc::clone(&self.sessions),
            settings: Arc::clone(&self.settings),
            tunnel: attachment.tunnel,
            grace: self.ssh.close_grace,
        };
        let task = tokio::spawn(actor.run());
        *handle.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        tracing::info!("Console session {} opened ({})", key, kind);
        Ok(handle.info())
    }

    fn get(&self, key: &SessionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.get(key).map(|r| Arc::clone(&r))
    }

    /// Queue terminal input. No-op for unknown sessions.
    pub fn write(&self, key: &SessionKey, data: &str) {
        let Some(handle) = self.get(key) else {
            tracing::trace!("Ignoring input for unknown session {}", key);
            return;
        };
        handle.touch();
        match handle.commands.try_send(SessionCommand::Input(data.to_string())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Input queue full for session {}, dropping {} bytes",
                    key,
                    data.len()
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Session {} is shutting down, input dropped", key);
            }
        }
    }

    /// Queue a window-size change. No-op for unknown sessions.
    pub fn resize(&self, key: &SessionKey, size: TerminalSize) {
        let Some(handle) = self.get(key) else {
            tracing::trace!("Ignoring resize for unknown session {}", key);
            return;
        };
        tracing::debug!("Resizing session {} to {}x{}", key, size.cols, size.rows);
        if let Err(e) = handle.commands.try_send(SessionCommand::Resize(size)) {
            tracing::debug!("Resize for session {} dropped: {}", key, e);
        }
    }

    /// Close a session.
    ///
    /// The entry is removed immediately; the backend is terminated in the
    /// background (graceful, then forced after the grace period). Returns
    /// whether the session existed.
    pub fn close(&self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, handle)) => {
                tracing::info!("Closing console session {}", key);
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Close a session and wait for its backend to be torn down
    pub async fn close_and_wait(&self, key: &SessionKey) -> bool {
        let Some((_, handle)) = self.sessions.remove(key) else {
            return false;
        };
        tracing::info!("Closing console session {}", key);
        handle.cancel.cancel();
        self.wait_for(&handle).await;
        true
    }

    async fn wait_for(&self, handle: &SessionHandle) {
        let Some(task) = handle.take_task() else {
            return;
        };
        let limit = self.ssh.close_grace + CLOSE_WAIT_SLACK;
        if tokio::time::timeout(limit, task).await.is_err() {
            tracing::warn!("Session {} did not shut down within {:?}", handle.key, limit);
        }
    }

    /// Close every session of a client connection. Returns how many were closed.
    pub fn close_all_for(&self, connection_id: &ConnectionId) -> usize {
        let keys: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|r| r.key().belongs_to(connection_id))
            .map(|r| r.key().clone())
            .collect();

        let closed = keys.iter().filter(|key| self.close(key)).count();
        if closed > 0 {
            tracing::info!(
                "Closed {} console session(s) of connection {}",
                closed,
                connection_id
            );
        }
        closed
    }

    /// Close every session and wait for the backends to go away
    pub async fn close_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|r| r.key().clone()).collect();
        let handles: Vec<Arc<SessionHandle>> = keys
            .iter()
            .filter_map(|key| self.sessions.remove(key).map(|(_, handle)| handle))
            .collect();

        for handle in &handles {
            handle.cancel.cancel();
        }
        futures::future::join_all(handles.iter().map(|handle| self.wait_for(handle))).await;

        if !handles.is_empty() {
            tracing::info!("Closed {} console session(s)", handles.len());
        }
        handles.len()
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session is registered under `key`
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// All live sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|r| r.info()).collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }
}

/// Single reader and single writer of one backend
struct SessionActor {
    handle: Arc<SessionHandle>,
    backend: Backend,
    commands: mpsc::Receiver<SessionCommand>,
    sink: OutboundSender,
    sessions: Arc<DashMap<SessionKey, Arc<SessionHandle>>>,
    settings: Arc<ConsoleSettings>,
    tunnel: Option<CancellationToken>,
    grace: Duration,
}

impl SessionActor {
    async fn run(self) {
        let SessionActor {
            handle,
            mut backend,
            mut commands,
            sink,
            sessions,
            settings,
            tunnel,
            grace,
        } = self;

        let session_id = handle.reply_id();
        let mut decoder = Utf8Carry::new();
        let mut guard = LineGuard::new();

        let tunnel_stopped = async move {
            match tunnel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(tunnel_stopped);

        let end = loop {
            tokio::select! {
                _ = handle.cancel.cancelled() => break SessionEnd::Closed,

                _ = &mut tunnel_stopped => {
                    break SessionEnd::Failed("Reverse tunnel was stopped".to_string());
                }

                command = commands.recv() => match command {
                    Some(SessionCommand::Input(data)) => {
                        let policy = settings.snapshot();
                        let guarded = guard.filter(&data, &policy);

                        let mut client_gone = false;
                        for rejection in guarded.rejections {
                            tracing::warn!(
                                "Blocked command in session {}: {:?} ({})",
                                handle.key,
                                truncate_for_log(&rejection.command),
                                rejection.reason
                            );
                            let message = ServerMessage::Error {
                                session_id: session_id.clone(),
                                message: rejection.reason,
                            };
                            if sink.send(message).await.is_err() {
                                client_gone = true;
                                break;
                            }
                        }
                        if client_gone {
                            break SessionEnd::ClientGone;
                        }

                        if !guarded.forward.is_empty() {
                            if let Err(e) = backend.write(Bytes::from(guarded.forward)).await {
                                break SessionEnd::Failed(e.to_string());
                            }
                        }
                    }
                    Some(SessionCommand::Resize(size)) => {
                        if let Err(e) = backend.resize(size).await {
                            tracing::debug!("Resize failed for session {}: {}", handle.key, e);
                        }
                    }
                    None => break SessionEnd::Closed,
                },

                output = backend.next_output() => match output {
                    Some(chunk) => {
                        handle.touch();
                        tracing::trace!("{} bytes from session {}", chunk.len(), handle.key);
                        let text = decoder.decode(&chunk);
                        if !text.is_empty() {
                            let message = ServerMessage::Data {
                                session_id: session_id.clone(),
                                data: text,
                            };
                            if sink.send(message).await.is_err() {
                                break SessionEnd::ClientGone;
                            }
                        }
                    }
                    None => break SessionEnd::Exited,
                },
            }
        };

        backend.terminate(grace).await;
        sessions.remove_if(&handle.key, |_, current| current.generation == handle.generation);

        match end {
            SessionEnd::ClientGone => {
                tracing::info!("Console session {} closed (client gone)", handle.key);
            }
            end => {
                let rest = decoder.flush();
                if !rest.is_empty() {
                    let _ = sink
                        .send(ServerMessage::Data {
                            session_id: session_id.clone(),
                            data: rest,
                        })
                        .await;
                }
                if let SessionEnd::Failed(message) = &end {
                    tracing::warn!("Console session {} failed: {}", handle.key, message);
                    let _ = sink
                        .send(ServerMessage::Error {
                            session_id: session_id.clone(),
                            message: message.clone(),
                        })
                        .await;
                }
                let _ = sink.send(ServerMessage::Closed { session_id }).await;
                let how = match end {
                    SessionEnd::Exited => "backend exited",
                    SessionEnd::Failed(_) => "backend failed",
                    _ => "closed",
                };
                tracing::info!("Console session {} closed ({})", handle.key, how);
            }
        }
    }
}
