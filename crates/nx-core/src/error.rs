//! Core error types for the console gateway

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to an operator while opening or driving a console.
///
/// The `Display` form of every variant is a single line that is safe to show
/// to the client: no stack traces, no internal identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// Command or path blocked by the policy engine
    #[error("{reason}")]
    PolicyViolation { reason: String },

    /// The global console switch is off
    #[error("Console access is disabled. Enable it in the gateway settings.")]
    Disabled,

    /// The per-node console switch is off
    #[error("Console access is disabled for node {0}")]
    NodeConsoleDisabled(String),

    /// Connection refused, unreachable, or failed during handshake
    #[error("SSH connection failed: {0}")]
    Connection(String),

    /// Remote host rejected our credentials
    #[error("SSH authentication failed. Make sure the gateway public key is in ~/.ssh/authorized_keys on {host}.")]
    AuthenticationFailed { host: String },

    /// Connect did not finish within the configured bound
    #[error("SSH connection to {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    /// Local shell or pseudo-terminal could not be created
    #[error("Local terminal failed: {0}")]
    Spawn(String),

    /// A tunneled connect was requested but the node has no tunnel
    #[error("No reverse tunnel is active for node {0}")]
    NoTunnel(String),

    /// The referenced session does not exist (already closed)
    #[error("Session not found: {0}")]
    UnknownSession(String),
}

/// Reverse tunnel registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    /// Every port in the configured range is held by another tunnel
    #[error("No free tunnel port in range {base}-{max}")]
    PortsExhausted { base: u16, max: u16 },

    /// An explicitly requested port is held by another node's tunnel
    #[error("Port {port} is already used by the tunnel for node {node_id}")]
    PortInUse { port: u16, node_id: String },

    /// An explicitly requested port lies outside the configured range
    #[error("Port {port} is outside the tunnel range {base}-{max}")]
    PortOutOfRange { port: u16, base: u16, max: u16 },

    /// No tunnel exists for the node
    #[error("No tunnel found for node {0}")]
    NotFound(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Gateway SSH identity errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Reading or writing the key file failed
    #[error("Identity key I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key could not be generated, encoded or decoded
    #[error("Identity key error: {0}")]
    Key(String),
}
