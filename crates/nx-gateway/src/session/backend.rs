//! Session backends
//!
//! A closed set of transports sharing one capability surface. PTY resize and
//! SSH window-change differences stay inside the variants.

use std::time::Duration;

use bytes::Bytes;

use nx_core::types::BackendKind;
use nx_core::ConsoleError;
use nx_protocol::TerminalSize;

use super::local::LocalPty;
use super::ssh::SshShell;

/// The resource a console session drives
pub enum Backend {
    /// Shell on the gateway host
    LocalPty(LocalPty),
    /// SSH straight to a host
    DirectSsh(SshShell),
    /// SSH through a node's reverse tunnel
    TunneledSsh(SshShell),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::LocalPty(_) => BackendKind::LocalPty,
            Backend::DirectSsh(_) => BackendKind::DirectSsh,
            Backend::TunneledSsh(_) => BackendKind::TunneledSsh,
        }
    }

    /// Next chunk of output; `None` once the backend has ended.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to the command queue.
    pub async fn next_output(&mut self) -> Option<Bytes> {
        match self {
            Backend::LocalPty(pty) => pty.next_output().await,
            Backend::DirectSsh(ssh) | Backend::TunneledSsh(ssh) => ssh.next_output().await,
        }
    }

    pub async fn write(&mut self, data: Bytes) -> Result<(), ConsoleError> {
        match self {
            Backend::LocalPty(pty) => pty.write(data).await,
            Backend::DirectSsh(ssh) | Backend::TunneledSsh(ssh) => ssh.write(data).await,
        }
    }

    pub async fn resize(&mut self, size: TerminalSize) -> Result<(), ConsoleError> {
        match self {
            Backend::LocalPty(pty) => pty.resize(size),
            Backend::DirectSsh(ssh) | Backend::TunneledSsh(ssh) => ssh.resize(size).await,
        }
    }

    /// Graceful shutdown, forced once `grace` has elapsed
    pub async fn terminate(self, grace: Duration) {
        match self {
            Backend::LocalPty(pty) => pty.terminate(grace).await,
            Backend::DirectSsh(ssh) | Backend::TunneledSsh(ssh) => ssh.terminate(grace).await,
        }
    }
}
