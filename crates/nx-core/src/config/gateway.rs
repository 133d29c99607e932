//! Gateway daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::{ConsoleConfig, NodeProfile};

/// Top-level configuration file for the gateway daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP/WebSocket server settings
    pub gateway: ServerConfig,

    /// Console security settings (initial values; runtime changes are
    /// persisted separately under the data directory)
    pub console: ConsoleConfig,

    /// Outbound SSH and terminal defaults
    pub ssh: SshConfig,

    /// Reverse tunnel settings
    pub tunnel: TunnelConfig,

    /// Statically declared nodes
    pub nodes: Vec<NodeProfile>,
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Directory holding the gateway SSH identity and persisted console settings
    pub data_dir: PathBuf,

    /// Override for this machine's hostname (used to detect combined deployments)
    pub hostname: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8420".to_string(),
            data_dir: super::default_data_dir(),
            hostname: None,
        }
    }
}

impl ServerConfig {
    /// This machine's hostname, honoring the configured override
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }

    /// Where the gateway identity key pair lives
    pub fn ssh_dir(&self) -> PathBuf {
        self.data_dir.join("ssh")
    }

    /// Where runtime console setting changes are persisted
    pub fn console_settings_path(&self) -> PathBuf {
        self.data_dir.join("console.toml")
    }
}

/// Outbound SSH and terminal defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Bound on TCP connect + handshake + authentication + shell open
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Grace period between the polite and the forced termination of a session
    #[serde(with = "duration_secs")]
    pub close_grace: Duration,

    /// Remote username when the connect request names none
    pub default_username: String,

    /// Port when the connect request names none
    pub default_port: u16,

    /// TERM value for every session
    pub term: String,

    /// Initial width
    pub cols: u16,

    /// Initial height
    pub rows: u16,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(5),
            default_username: whoami::username(),
            default_port: 22,
            term: "xterm-256color".to_string(),
            cols: 120,
            rows: 30,
        }
    }
}

/// Reverse tunnel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// First port handed out to a tunnel
    pub base_port: u16,

    /// Last port handed out to a tunnel (inclusive)
    pub max_port: u16,

    /// Age after which a tunnel stops counting as active
    #[serde(with = "duration_secs")]
    pub max_age: Duration,

    /// Host nodes dial back to
    pub server_host: String,

    /// SSH port nodes dial back to
    pub server_port: u16,

    /// Account nodes authenticate as on the gateway host
    pub username: String,

    /// Account the gateway logs in as on the node, through the tunnel
    pub node_username: String,

    /// Name of the node-side reverse tunnel binary
    pub agent_binary: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            base_port: 9000,
            max_port: 9999,
            max_age: Duration::from_secs(3600),
            server_host: "localhost".to_string(),
            server_port: 22,
            username: "nexus".to_string(),
            node_username: "root".to_string(),
            agent_binary: "reverse-ssh".to_string(),
        }
    }
}
