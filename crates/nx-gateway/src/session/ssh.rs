//! Interactive shells over SSH
//!
//! Used both for direct connections and for connections relayed through a
//! node's reverse tunnel (which is just SSH to a gateway-local port).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use nx_core::config::SshConfig;
use nx_core::ConsoleError;
use nx_protocol::{Credential, TerminalSize};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How the gateway proves its identity to the remote sshd
#[derive(Clone)]
pub enum SshAuth {
    /// Public key (the gateway identity or a caller-supplied key)
    Key(Arc<KeyPair>),
    /// Password login
    Password(String),
}

impl SshAuth {
    /// Resolve a request credential, falling back to `identity`
    pub fn from_credential(
        credential: Option<&Credential>,
        identity: Arc<KeyPair>,
    ) -> Result<Self, ConsoleError> {
        match credential {
            None => Ok(SshAuth::Key(identity)),
            Some(Credential::Password { password }) => Ok(SshAuth::Password(password.clone())),
            Some(Credential::PrivateKey {
                private_key,
                passphrase,
            }) => russh_keys::decode_secret_key(private_key, passphrase.as_deref())
                .map(|key| SshAuth::Key(Arc::new(key)))
                .map_err(|e| ConsoleError::Connection(format!("invalid private key: {}", e))),
        }
    }
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Key(_) => write!(f, "SshAuth::Key(<redacted>)"),
            SshAuth::Password(_) => write!(f, "SshAuth::Password(<redacted>)"),
        }
    }
}

/// Where to connect and as whom
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

/// russh client callbacks
struct ConsoleClient {
    host: String,
}

#[async_trait]
impl client::Handler for ConsoleClient {
    type Error = anyhow::Error;

    /// Nodes are enrolled by installing the gateway key on them, not the
    /// other way round, so host keys are logged rather than pinned.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Host key for {}: {}",
            self.host,
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}

/// An open shell channel and the connection carrying it
pub struct SshShell {
    session: Handle<ConsoleClient>,
    channel: Channel<Msg>,
    host: String,
}

impl SshShell {
    /// Connect, authenticate and start an interactive shell.
    ///
    /// The whole handshake is bounded by `config.connect_timeout`. On any
    /// failure the partially built connection is dropped, so nothing is left
    /// half-open.
    pub async fn open(
        target: &SshTarget,
        size: TerminalSize,
        config: &SshConfig,
    ) -> Result<Self, ConsoleError> {
        match tokio::time::timeout(config.connect_timeout, Self::establish(target, size, config))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "SSH connection to {}:{} timed out",
                    target.host,
                    target.port
                );
                Err(ConsoleError::Timeout {
                    host: target.host.clone(),
                    secs: config.connect_timeout.as_secs(),
                })
            }
        }
    }

    async fn establish(
        target: &SshTarget,
        size: TerminalSize,
        config: &SshConfig,
    ) -> Result<Self, ConsoleError> {
        let ssh_config = Arc::new(Config {
            inactivity_timeout: None,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        });
        let handler = ConsoleClient {
            host: target.host.clone(),
        };

        tracing::debug!(
            "Connecting to {}@{}:{}",
            target.username,
            target.host,
            target.port
        );
        let mut session =
            client::connect(ssh_config, (target.host.as_str(), target.port), handler)
                .await
                .map_err(|e| {
                    tracing::warn!("SSH connection to {} failed: {}", target.host, e);
                    ConsoleError::Connection(e.to_string())
                })?;

        let authenticated = match &target.auth {
            SshAuth::Key(key) => {
                session
                    .authenticate_publickey(target.username.as_str(), Arc::clone(key))
                    .await
            }
            SshAuth::Password(password) => {
                session
                    .authenticate_password(target.username.as_str(), password.as_str())
                    .await
            }
        };

        let failure = match authenticated {
            Ok(true) => None,
            Ok(false) => Some(ConsoleError::AuthenticationFailed {
                host: target.host.clone(),
            }),
            Err(e) => Some(ConsoleError::Connection(e.to_string())),
        };
        if let Some(err) = failure {
            tracing::warn!("SSH authentication to {} failed: {}", target.host, err);
            disconnect(&session).await;
            return Err(err);
        }

        match open_shell(&session, size, &config.term).await {
            Ok(channel) => {
                tracing::info!(
                    "SSH connected to {}:{} as {}",
                    target.host,
                    target.port,
                    target.username
                );
                Ok(Self {
                    session,
                    channel,
                    host: target.host.clone(),
                })
            }
            Err(e) => {
                tracing::warn!("Failed to open shell on {}: {}", target.host, e);
                disconnect(&session).await;
                Err(ConsoleError::Connection(format!("failed to open shell: {}", e)))
            }
        }
    }

    /// Next chunk of output (stdout and stderr interleaved); `None` once the
    /// channel is closed
    pub async fn next_output(&mut self) -> Option<Bytes> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { data } => return Some(Bytes::copy_from_slice(&data)),
                ChannelMsg::ExtendedData { data, .. } => {
                    return Some(Bytes::copy_from_slice(&data))
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    tracing::debug!("Remote shell on {} exited with {}", self.host, exit_status);
                }
                ChannelMsg::Close => return None,
                _ => {}
            }
        }
    }

    /// Send input to the remote shell
    pub async fn write(&mut self, data: Bytes) -> Result<(), ConsoleError> {
        self.channel
            .data(&data[..])
            .await
            .map_err(|e| ConsoleError::Connection(e.to_string()))
    }

    /// Send a window-change request
    pub async fn resize(&mut self, size: TerminalSize) -> Result<(), ConsoleError> {
        self.channel
            .window_change(size.cols as u32, size.rows as u32, 0, 0)
            .await
            .map_err(|e| ConsoleError::Connection(e.to_string()))
    }

    /// End the channel and the connection, giving up after `grace`
    pub async fn terminate(self, grace: Duration) {
        let SshShell {
            session,
            channel,
            host,
        } = self;

        let shutdown = async {
            let _ = channel.eof().await;
            let _ = channel.close().await;
            disconnect(&session).await;
        };
        if tokio::time::timeout(grace, shutdown).await.is_err() {
            tracing::warn!("SSH session to {} did not close within {:?}", host, grace);
        }
    }
}

async fn open_shell(
    session: &Handle<ConsoleClient>,
    size: TerminalSize,
    term: &str,
) -> Result<Channel<Msg>, russh::Error> {
    let channel = session.channel_open_session().await?;
    channel
        .request_pty(false, term, size.cols as u32, size.rows as u32, 0, 0, &[])
        .await?;
    channel.request_shell(false).await?;
    Ok(channel)
}

async fn disconnect(session: &Handle<ConsoleClient>) {
    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!("SSH disconnect failed: {}", e);
    }
}
