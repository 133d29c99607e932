//! Protocol multiplexer
//!
//! One per client connection. Decodes `terminal:*` messages and hands them
//! to the router or the session registry under a key derived from the
//! connection and the message's session ID.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use nx_protocol::{ClientMessage, ConnectRequest, ConnectionId, ServerMessage, SessionKey};

use crate::router::ChannelRouter;
use crate::session::{OutboundSender, SessionRegistry};

/// Multiplexes many console sessions over one client channel
pub struct ConnectionMux {
    connection_id: ConnectionId,
    outbound: OutboundSender,
    router: Arc<ChannelRouter>,
    sessions: Arc<SessionRegistry>,
    /// Cancelled when the client channel goes away
    closed: CancellationToken,
}

impl ConnectionMux {
    pub fn new(
        connection_id: ConnectionId,
        outbound: OutboundSender,
        router: Arc<ChannelRouter>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            connection_id,
            outbound,
            router,
            sessions,
            closed: CancellationToken::new(),
        }
    }

    /// Handle one raw text frame. Malformed frames are answered with an
    /// untagged `terminal:error`.
    pub async fn handle_text(&self, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::warn!("Bad frame from connection {}: {}", self.connection_id, e);
                let _ = self
                    .outbound
                    .send(ServerMessage::Error {
                        session_id: None,
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Dispatch one decoded message.
    ///
    /// Messages for unknown or already closed sessions are dropped quietly.
    pub async fn handle(&self, message: ClientMessage) {
        tracing::trace!(
            "Connection {} sent {:?}",
            self.connection_id,
            message.session_id()
        );
        match message {
            ClientMessage::Connect(request) => self.spawn_connect(request),
            ClientMessage::Data(request) => {
                let key = self.key(request.session_id.as_deref());
                self.sessions.write(&key, &request.data);
            }
            ClientMessage::Resize(request) => {
                let key = self.key(request.session_id.as_deref());
                self.sessions.resize(&key, request.size());
            }
            ClientMessage::Disconnect(request) => {
                let key = self.key(request.session_id.as_deref());
                if !self.sessions.close(&key) {
                    tracing::debug!("Disconnect for unknown session {}", key);
                }
            }
        }
    }

    fn key(&self, session_id: Option<&str>) -> SessionKey {
        SessionKey::for_message(&self.connection_id, session_id)
    }

    /// Connects run in their own task so a slow SSH handshake never holds
    /// up input for the connection's other sessions.
    fn spawn_connect(&self, request: ConnectRequest) {
        let key = self.key(request.session_id.as_deref());
        let reply_to = request.session_id.clone();
        let router = Arc::clone(&self.router);
        let sessions = Arc::clone(&self.sessions);
        let outbound = self.outbound.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            match router.connect(key.clone(), request, outbound.clone()).await {
                Ok(info) => {
                    // The channel went away while we were connecting; the
                    // session was registered after the sweep, so close it here.
                    if closed.is_cancelled() {
                        tracing::debug!("Connection gone, closing new session {}", key);
                        sessions.close(&key);
                    } else {
                        tracing::debug!("Session {} attached to {}", key, info.host);
                    }
                }
                Err(e) => {
                    tracing::warn!("Console connect {} failed: {}", key, e);
                    let _ = outbound
                        .send(ServerMessage::Error {
                            session_id: reply_to,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    /// The client channel is gone: close every session it owned
    pub fn shutdown(&self) -> usize {
        self.closed.cancel();
        let closed = self.sessions.close_all_for(&self.connection_id);
        tracing::debug!(
            "Connection {} shut down, {} session(s) closed",
            self.connection_id,
            closed
        );
        closed
    }
}

impl Drop for ConnectionMux {
    fn drop(&mut self) {
        if !self.closed.is_cancelled() {
            self.shutdown();
        }
    }
}
