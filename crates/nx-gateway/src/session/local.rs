//! Local shell behind a pseudo-terminal
//!
//! portable-pty hands out blocking reader/writer handles, so each session
//! gets one reader thread and one writer thread bridged to async channels.

use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use nx_core::ConsoleError;
use nx_protocol::TerminalSize;

/// Buffered output chunks per session before the reader thread blocks
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Buffered input chunks per session before writes wait
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// How often a terminating shell is polled for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shells a console may run
const ALLOWED_SHELLS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/fish",
    "/bin/dash",
    "/bin/ksh",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/fish",
    "/usr/bin/dash",
    "/usr/bin/ksh",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/fish",
    "/opt/homebrew/bin/bash",
    "/opt/homebrew/bin/zsh",
    "/opt/homebrew/bin/fish",
];

/// Whether `shell` may be spawned: on the allow list or in `/etc/shells`,
/// and present on disk.
fn is_allowed_shell(shell: &str) -> bool {
    if !Path::new(shell).exists() {
        return false;
    }
    if ALLOWED_SHELLS.contains(&shell) {
        return true;
    }
    std::fs::read_to_string("/etc/shells")
        .map(|shells| {
            shells
                .lines()
                .map(str::trim)
                .any(|line| !line.starts_with('#') && line == shell)
        })
        .unwrap_or(false)
}

/// The operator's `$SHELL` if allowed, otherwise bash, otherwise sh
fn resolve_shell() -> Result<String, ConsoleError> {
    let preferred = std::env::var("SHELL").ok();
    let shell = preferred
        .as_deref()
        .into_iter()
        .chain(["/bin/bash", "/bin/sh"])
        .find(|shell| is_allowed_shell(shell))
        .map(str::to_string);
    shell.ok_or_else(|| ConsoleError::Spawn("no allowed shell found".to_string()))
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_error(context: &str, e: impl std::fmt::Display) -> ConsoleError {
    ConsoleError::Spawn(format!("{}: {}", context, e))
}

/// Start the reader and writer threads for a PTY master
fn bridge(
    master: &dyn MasterPty,
) -> Result<(mpsc::Receiver<Bytes>, mpsc::Sender<Bytes>), ConsoleError> {
    let reader = master
        .try_clone_reader()
        .map_err(|e| spawn_error("failed to clone PTY reader", e))?;
    let writer = master
        .take_writer()
        .map_err(|e| spawn_error("failed to take PTY writer", e))?;

    let (output_tx, output) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    let (input, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    spawn_reader(reader, output_tx)?;
    spawn_writer(writer, input_rx)?;
    Ok((output, input))
}

/// A running shell on the gateway host
pub struct LocalPty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    output: mpsc::Receiver<Bytes>,
    input: mpsc::Sender<Bytes>,
}

impl LocalPty {
    /// Spawn the operator's shell in their home directory.
    ///
    /// Opens a PTY and forks, so call it from a blocking context.
    pub fn spawn(size: TerminalSize, term: &str) -> Result<Self, ConsoleError> {
        let shell = resolve_shell()?;

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| spawn_error("failed to open PTY", e))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.env("TERM", term);
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(&format!("failed to spawn {}", shell), e))?;
        // Only the child may hold the slave, otherwise the reader never sees EOF
        drop(pair.slave);

        let (output, input) = match bridge(pair.master.as_ref()) {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(
                    "Killing shell {:?} after failed setup: {}",
                    child.process_id(),
                    e
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        tracing::info!(
            "Spawned local shell {} (pid {:?}) at {}x{}",
            shell,
            child.process_id(),
            size.cols,
            size.rows
        );

        Ok(Self {
            master: pair.master,
            child,
            output,
            input,
        })
    }

    /// Next chunk of output; `None` once the terminal is closed
    pub async fn next_output(&mut self) -> Option<Bytes> {
        self.output.recv().await
    }

    /// Queue input for the shell
    pub async fn write(&mut self, data: Bytes) -> Result<(), ConsoleError> {
        self.input
            .send(data)
            .await
            .map_err(|_| ConsoleError::Spawn("terminal input is closed".to_string()))
    }

    /// Change the terminal geometry
    pub fn resize(&mut self, size: TerminalSize) -> Result<(), ConsoleError> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| spawn_error("failed to resize PTY", e))
    }

    /// Hang up and terminate the shell, killing it if it outlives `grace`
    pub async fn terminate(self, grace: Duration) {
        let LocalPty {
            master,
            mut child,
            input,
            output,
            ..
        } = self;
        drop(input);

        let pid = child.process_id();
        #[cfg(unix)]
        if let Some(pid) = pid {
            signal(pid, libc::SIGHUP);
            signal(pid, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = child.kill();
        drop(master);

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Shell {:?} exited with code {}", pid, status.exit_code());
                    break;
                }
                Ok(None) if Instant::now() < deadline => {
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
                Ok(None) => {
                    tracing::warn!(
                        "Shell {:?} still running after {:?}, killing it",
                        pid,
                        grace
                    );
                    #[cfg(unix)]
                    if let Some(pid) = pid {
                        signal(pid, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    let _ = child.kill();
                    let _ = tokio::task::spawn_blocking(move || child.wait()).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to check shell {:?} status: {}", pid, e);
                    break;
                }
            }
        }

        drop(output);
    }
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) {
    // SAFETY: kill(2) has no memory-safety preconditions
    let result = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if result != 0 {
        tracing::trace!(
            "kill({}, {}) failed: {}",
            pid,
            sig,
            std::io::Error::last_os_error()
        );
    }
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<Bytes>,
) -> Result<(), ConsoleError> {
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("PTY reader EOF");
                        break;
                    }
                    Ok(n) => {
                        if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            tracing::debug!("PTY output channel closed");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO once the shell exits on Linux
                        tracing::debug!("PTY reader stopped: {}", e);
                        break;
                    }
                }
            }
        })
        .map(|_| ())
        .map_err(|e| spawn_error("failed to start PTY reader", e))
}

fn spawn_writer(
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<Bytes>,
) -> Result<(), ConsoleError> {
    std::thread::Builder::new()
        .name("pty-writer".to_string())
        .spawn(move || {
            while let Some(data) = rx.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    tracing::debug!("PTY writer stopped: {}", e);
                    break;
                }
            }
        })
        .map(|_| ())
        .map_err(|e| spawn_error("failed to start PTY writer", e))
}
