//! Connection and session identifier types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one client channel (one WebSocket, one socket.io connection)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Registry key of one console session: `(connectionId, sessionId)`
///
/// Session IDs are chosen by the client and are only unique within their
/// connection, so the pair is what identifies a session gateway-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    /// Owning client channel
    pub connection_id: ConnectionId,
    /// Client-chosen session identifier
    pub session_id: String,
}

impl SessionKey {
    /// Create a key from its parts
    pub fn new(connection_id: ConnectionId, session_id: impl Into<String>) -> Self {
        Self {
            connection_id,
            session_id: session_id.into(),
        }
    }

    /// Build the key for a message, falling back to the bare connection ID
    /// when the client did not name a session (legacy single-session clients).
    pub fn for_message(connection_id: &ConnectionId, session_id: Option<&str>) -> Self {
        let session_id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => connection_id.0.clone(),
        };
        Self::new(connection_id.clone(), session_id)
    }

    /// Whether this session belongs to the given connection
    pub fn belongs_to(&self, connection_id: &ConnectionId) -> bool {
        self.connection_id == *connection_id
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.session_id)
    }
}
