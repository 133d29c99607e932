//! Session registry integration tests
//!
//! Drives real local shells through the registry and the router.

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

use nx_core::config::GatewayConfig;
use nx_core::ConsoleError;
use nx_gateway::GatewayState;
use nx_protocol::{ConnectRequest, ConnectionId, ServerMessage, SessionKey};

const WAIT: Duration = Duration::from_secs(10);

/// Create test state rooted in a temporary data directory
fn create_test_state() -> (GatewayState, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = GatewayConfig::default();
    config.gateway.data_dir = dir.path().to_path_buf();
    config.gateway.hostname = Some("gateway-test".into());
    config.ssh.connect_timeout = Duration::from_secs(3);
    config.ssh.close_grace = Duration::from_secs(1);
    (GatewayState::new(config).unwrap(), dir)
}

fn key(connection: &str, session: &str) -> SessionKey {
    SessionKey::new(ConnectionId::new(connection), session)
}

/// Collect output tagged with `session_id` until it contains `needle`
async fn wait_for_output(
    rx: &mut mpsc::Receiver<ServerMessage>,
    session_id: &str,
    needle: &str,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    let mut output = String::new();
    let result = timeout(WAIT, async {
        while let Some(message) = rx.recv().await {
            if let ServerMessage::Data {
                session_id: Some(id),
                data,
            } = &message
            {
                if id == session_id {
                    output.push_str(data);
                }
            }
            seen.push(message);
            if output.contains(needle) {
                return;
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {:?} in {:?}",
        needle,
        output
    );
    seen
}

async fn expect_connected(rx: &mut mpsc::Receiver<ServerMessage>, session_id: &str) {
    let message = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match message {
        ServerMessage::Connected {
            session_id: Some(id),
            message,
            ..
        } => {
            assert_eq!(id, session_id);
            assert_eq!(message, "Connected to local shell");
        }
        other => panic!("expected connected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_local_shell_echo() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    state
        .sessions
        .open_local(key("c1", "s1"), None, tx)
        .await
        .unwrap();
    expect_connected(&mut rx, "s1").await;
    assert_eq!(state.sessions.count(), 1);

    // The echoed input holds "40+2", only the shell's answer holds "42"
    state.sessions.write(&key("c1", "s1"), "echo $((40+2))\n");
    wait_for_output(&mut rx, "s1", "42").await;

    state.sessions.close_all().await;
}

#[tokio::test]
async fn test_close_removes_session_and_write_is_noop() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    state
        .sessions
        .open_local(key("c1", "s1"), None, tx.clone())
        .await
        .unwrap();
    state
        .sessions
        .open_local(key("c1", "s2"), None, tx)
        .await
        .unwrap();
    assert_eq!(state.sessions.count(), 2);

    assert!(state.sessions.close(&key("c1", "s1")));
    assert_eq!(state.sessions.count(), 1);
    assert!(!state.sessions.contains(&key("c1", "s1")));

    // Unknown sessions are ignored
    state.sessions.write(&key("c1", "s1"), "ls\n");
    state
        .sessions
        .resize(&key("c1", "s1"), nx_protocol::TerminalSize::new(80, 24));
    assert!(!state.sessions.close(&key("c1", "s1")));
    assert_eq!(state.sessions.count(), 1);

    // The closed session reports closed
    let closed = timeout(WAIT, async {
        while let Some(message) = rx.recv().await {
            if message == ServerMessage::closed("s1") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closed);

    state.sessions.close_all().await;
    assert_eq!(state.sessions.count(), 0);
}

#[tokio::test]
async fn test_sessions_on_one_connection_are_independent() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    state
        .sessions
        .open_local(key("c1", "a"), None, tx.clone())
        .await
        .unwrap();
    state
        .sessions
        .open_local(key("c1", "b"), None, tx)
        .await
        .unwrap();

    state.sessions.write(&key("c1", "a"), "echo $((6*7))\n");
    let seen = wait_for_output(&mut rx, "a", "42").await;

    let leaked = seen.iter().any(|m| {
        matches!(m, ServerMessage::Data { session_id: Some(id), data }
            if id == "b" && data.contains("42"))
    });
    assert!(!leaked, "session b saw session a's output");

    // Closing b leaves a running
    assert!(state.sessions.close(&key("c1", "b")));
    assert!(state.sessions.contains(&key("c1", "a")));
    assert_eq!(state.sessions.count(), 1);

    state.sessions.close_all().await;
}

#[tokio::test]
async fn test_close_all_for_connection() {
    let (state, _dir) = create_test_state();
    let (tx, _rx) = mpsc::channel(1024);

    for (conn, session) in [("c1", "s1"), ("c1", "s2"), ("c2", "s1")] {
        state
            .sessions
            .open_local(key(conn, session), None, tx.clone())
            .await
            .unwrap();
    }
    assert_eq!(state.sessions.count(), 3);

    let closed = state.sessions.close_all_for(&ConnectionId::new("c1"));
    assert_eq!(closed, 2);
    assert_eq!(state.sessions.count(), 1);
    assert!(state.sessions.contains(&key("c2", "s1")));

    assert_eq!(state.sessions.close_all_for(&ConnectionId::new("c1")), 0);
    state.sessions.close_all().await;
}

#[tokio::test]
async fn test_reopening_a_key_replaces_the_session() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    let first = state
        .sessions
        .open_local(key("c1", "s1"), None, tx.clone())
        .await
        .unwrap();
    let second = state
        .sessions
        .open_local(key("c1", "s1"), None, tx)
        .await
        .unwrap();
    assert!(second.created_at >= first.created_at);
    assert_eq!(state.sessions.count(), 1);

    // connected, closed (old), connected (new)
    let mut events = Vec::new();
    while events.len() < 3 {
        let message = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        if !matches!(message, ServerMessage::Data { .. }) {
            events.push(message.event());
        }
    }
    assert_eq!(
        events,
        ["terminal:connected", "terminal:closed", "terminal:connected"]
    );

    state.sessions.close_all().await;
}

#[tokio::test]
async fn test_blocked_command_is_reported_and_not_run() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    state
        .sessions
        .open_local(key("c1", "s1"), None, tx)
        .await
        .unwrap();
    expect_connected(&mut rx, "s1").await;

    state.sessions.write(&key("c1", "s1"), "sudo ls\n");
    let reason = timeout(WAIT, async {
        while let Some(message) = rx.recv().await {
            if let ServerMessage::Error {
                session_id: Some(id),
                message,
            } = message
            {
                assert_eq!(id, "s1");
                return message;
            }
        }
        String::new()
    })
    .await
    .unwrap();
    assert!(reason.contains("sudo"), "{}", reason);
    assert!(state.sessions.contains(&key("c1", "s1")));

    state.sessions.close_all().await;
}

#[tokio::test]
async fn test_unreachable_host_fails_without_registering() {
    let (state, _dir) = create_test_state();
    let (tx, _rx) = mpsc::channel(16);

    let request = ConnectRequest {
        session_id: Some("s2".into()),
        host: Some("unreachable.invalid".into()),
        ..Default::default()
    };
    let result = timeout(
        Duration::from_secs(5),
        state.router.connect(key("c1", "s2"), request, tx),
    )
    .await
    .expect("connect should be bounded by the connect timeout");

    assert!(matches!(
        result,
        Err(ConsoleError::Connection(_)) | Err(ConsoleError::Timeout { .. })
    ));
    assert_eq!(state.sessions.count(), 0);
}

#[tokio::test]
async fn test_disabled_console_rejects_before_spawning() {
    let (state, _dir) = create_test_state();
    state.settings.set_enabled(false).unwrap();
    let (tx, mut rx) = mpsc::channel(16);

    let request = ConnectRequest {
        session_id: Some("s1".into()),
        is_local: true,
        ..Default::default()
    };
    let result = state.router.connect(key("c1", "s1"), request, tx).await;
    assert_eq!(result.unwrap_err(), ConsoleError::Disabled);
    assert_eq!(state.sessions.count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_tunneled_connect_without_tunnel() {
    let (state, _dir) = create_test_state();
    let (tx, _rx) = mpsc::channel(16);

    let request = ConnectRequest {
        session_id: Some("s1".into()),
        node_id: Some("edge-7".into()),
        use_reverse_tunnel: true,
        ..Default::default()
    };
    let result = state.router.connect(key("c1", "s1"), request, tx).await;
    assert_eq!(
        result.unwrap_err(),
        ConsoleError::NoTunnel("edge-7".into())
    );
}

/// First complete `PID=<digits>` in the shell output
fn parse_pid(output: &str) -> Option<i32> {
    output.match_indices("PID=").find_map(|(at, marker)| {
        let rest = &output[at + marker.len()..];
        let end = rest.find(|c: char| !c.is_ascii_digit())?;
        rest[..end].parse().ok()
    })
}

#[cfg(unix)]
#[tokio::test]
async fn test_close_kills_shell_that_ignores_signals() {
    let (state, _dir) = create_test_state();
    let (tx, mut rx) = mpsc::channel(256);

    state
        .sessions
        .open_local(key("c1", "s1"), None, tx)
        .await
        .unwrap();
    expect_connected(&mut rx, "s1").await;

    state
        .sessions
        .write(&key("c1", "s1"), "trap '' HUP TERM; echo PID=$$\n");
    let mut output = String::new();
    let pid = timeout(WAIT, async {
        while let Some(message) = rx.recv().await {
            if let ServerMessage::Data { data, .. } = message {
                output.push_str(&data);
                if let Some(pid) = parse_pid(&output) {
                    return pid;
                }
            }
        }
        panic!("channel closed before the shell printed its pid");
    })
    .await
    .expect("shell never printed its pid");

    assert!(state.sessions.close_and_wait(&key("c1", "s1")).await);
    assert_eq!(state.sessions.count(), 0);

    // SAFETY: signal 0 only checks that the process exists
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive, "shell {} outlived close", pid);
}
