//! Message types for the console channel protocol
//!
//! Every frame on the client channel is a JSON envelope:
//!
//! ```text
//! {"event": "terminal:data", "payload": {"sessionId": "s1", "data": "ls\n"}}
//! ```
//!
//! # Message Flow
//!
//! 1. Client sends `terminal:connect` naming a session ID and a target
//! 2. Gateway replies `terminal:connected` (or `terminal:error`)
//! 3. `terminal:data` flows in both directions, tagged with the session ID
//! 4. `terminal:resize` from the client changes the window size
//! 5. Either side ends the session: client sends `terminal:disconnect`,
//!    gateway sends `terminal:closed` once the backend is gone
//!
//! Legacy single-session clients omit `sessionId` and may send `terminal:data`
//! with a bare string payload. The gateway then keys the session by the
//! connection ID alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ProtocolError;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Geometry every new console starts with (120x30)
    pub fn console_default() -> Self {
        Self { cols: 120, rows: 30 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::console_default()
    }
}

/// Secret material supplied with a direct SSH connect request.
///
/// When a request carries no credential the gateway authenticates with its
/// own identity key.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    /// Password authentication
    Password {
        /// The password
        password: String,
    },
    /// Public key authentication with a caller-supplied private key
    PrivateKey {
        /// PEM or OpenSSH encoded private key
        #[serde(rename = "privateKey")]
        private_key: String,
        /// Passphrase protecting the key
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl Credential {
    /// Short, non-secret label for logs and listings
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password { .. } => "password",
            Credential::PrivateKey { .. } => "private-key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}, <redacted>)", self.kind())
    }
}

/// Payload of `terminal:connect`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Client-chosen session identifier
    #[serde(default)]
    pub session_id: Option<String>,
    /// Explicitly request a shell on the gateway host
    #[serde(default)]
    pub is_local: bool,
    /// Target node, if the console is opened from a node page
    #[serde(default)]
    pub node_id: Option<String>,
    /// Host for a direct SSH connection
    #[serde(default)]
    pub host: Option<String>,
    /// Port for a direct SSH connection
    #[serde(default)]
    pub port: Option<u16>,
    /// Remote username
    #[serde(default)]
    pub username: Option<String>,
    /// Credential for the remote login
    #[serde(default)]
    pub credential: Option<Credential>,
    /// Route through the node's reverse tunnel
    #[serde(default)]
    pub use_reverse_tunnel: bool,
}

/// Payload of `terminal:data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    /// Target session; `None` for legacy clients
    pub session_id: Option<String>,
    /// Raw terminal input
    pub data: String,
}

/// Payload of `terminal:resize`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
    /// Target session; `None` for legacy clients
    #[serde(default)]
    pub session_id: Option<String>,
    /// New width
    pub cols: u16,
    /// New height
    pub rows: u16,
}

impl ResizeRequest {
    /// The requested geometry
    pub fn size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }
}

/// Payload of `terminal:disconnect`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    /// Session to close; `None` closes the legacy session
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Messages sent by the client
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Open a new console session
    Connect(ConnectRequest),
    /// Terminal input
    Data(DataRequest),
    /// Window size change
    Resize(ResizeRequest),
    /// Close a session
    Disconnect(DisconnectRequest),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

impl ClientMessage {
    pub const CONNECT: &'static str = "terminal:connect";
    pub const DATA: &'static str = "terminal:data";
    pub const RESIZE: &'static str = "terminal:resize";
    pub const DISCONNECT: &'static str = "terminal:disconnect";

    /// Decode one JSON frame from the client
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_event(&envelope.event, envelope.payload)
    }

    /// Decode a message from an event name and its payload
    pub fn from_event(event: &str, payload: Value) -> Result<Self, ProtocolError> {
        match event {
            Self::CONNECT => {
                let request = if payload.is_null() {
                    ConnectRequest::default()
                } else {
                    serde_json::from_value(payload)?
                };
                Ok(ClientMessage::Connect(request))
            }
            Self::DATA => Ok(ClientMessage::Data(parse_data(payload)?)),
            Self::RESIZE => Ok(ClientMessage::Resize(serde_json::from_value(payload)?)),
            Self::DISCONNECT => {
                let request = match payload {
                    Value::Null => DisconnectRequest::default(),
                    Value::String(session_id) => DisconnectRequest {
                        session_id: Some(session_id),
                    },
                    other => serde_json::from_value(other)?,
                };
                Ok(ClientMessage::Disconnect(request))
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// The session ID the message refers to, if the client named one
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Connect(r) => r.session_id.as_deref(),
            ClientMessage::Data(r) => r.session_id.as_deref(),
            ClientMessage::Resize(r) => r.session_id.as_deref(),
            ClientMessage::Disconnect(r) => r.session_id.as_deref(),
        }
    }
}

fn parse_data(payload: Value) -> Result<DataRequest, ProtocolError> {
    match payload {
        Value::String(data) => Ok(DataRequest {
            session_id: None,
            data,
        }),
        Value::Object(mut map) => {
            let data = match map.remove("data") {
                Some(Value::String(data)) => data,
                _ => return Err(ProtocolError::MissingField("data")),
            };
            let session_id = match map.remove("sessionId") {
                Some(Value::String(id)) => Some(id),
                _ => None,
            };
            Ok(DataRequest { session_id, data })
        }
        _ => Err(ProtocolError::MissingField("data")),
    }
}

/// Messages sent by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A session is attached and ready for input
    #[serde(rename = "terminal:connected")]
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        host: String,
        username: String,
        message: String,
    },

    /// Terminal output
    #[serde(rename = "terminal:data")]
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        data: String,
    },

    /// A connect failed, input was rejected, or a backend failed
    #[serde(rename = "terminal:error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },

    /// The session is gone
    #[serde(rename = "terminal:closed")]
    Closed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ServerMessage {
    /// Build a `terminal:error` for a session
    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            session_id: Some(session_id.into()),
            message: message.into(),
        }
    }

    /// Build a `terminal:closed` for a session
    pub fn closed(session_id: impl Into<String>) -> Self {
        ServerMessage::Closed {
            session_id: Some(session_id.into()),
        }
    }

    /// Build a `terminal:data` for a session
    pub fn data(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        ServerMessage::Data {
            session_id: Some(session_id.into()),
            data: data.into(),
        }
    }

    /// The session this message is tagged with
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Connected { session_id, .. }
            | ServerMessage::Data { session_id, .. }
            | ServerMessage::Error { session_id, .. }
            | ServerMessage::Closed { session_id } => session_id.as_deref(),
        }
    }

    /// Event name on the wire
    pub fn event(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "terminal:connected",
            ServerMessage::Data { .. } => "terminal:data",
            ServerMessage::Error { .. } => "terminal:error",
            ServerMessage::Closed { .. } => "terminal:closed",
        }
    }

    /// Encode as one JSON text frame
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to encode {} message: {}", self.event(), e);
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 30);
    }

    #[test]
    fn test_parse_connect() {
        let msg = ClientMessage::from_json(
            r#"{"event":"terminal:connect","payload":{"sessionId":"s1","isLocal":true}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Connect(req) => {
                assert_eq!(req.session_id.as_deref(), Some("s1"));
                assert!(req.is_local);
                assert!(!req.use_reverse_tunnel);
                assert!(req.credential.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_connect_with_credentials() {
        let msg = ClientMessage::from_json(
            r#"{"event":"terminal:connect","payload":{"sessionId":"s2","host":"10.0.0.5","port":2222,"username":"ops","credential":{"password":"hunter2"}}}"#,
        )
        .unwrap();
        let ClientMessage::Connect(req) = msg else {
            panic!("expected connect");
        };
        assert_eq!(req.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(req.port, Some(2222));
        assert_eq!(req.credential.as_ref().map(|c| c.kind()), Some("password"));
        assert!(!format!("{:?}", req).contains("hunter2"));
    }

    #[test]
    fn test_parse_private_key_credential() {
        let msg = ClientMessage::from_json(
            r#"{"event":"terminal:connect","payload":{"host":"h","credential":{"privateKey":"KEY"}}}"#,
        )
        .unwrap();
        let ClientMessage::Connect(req) = msg else {
            panic!("expected connect");
        };
        assert_eq!(
            req.credential,
            Some(Credential::PrivateKey {
                private_key: "KEY".into(),
                passphrase: None
            })
        );
    }

    #[test]
    fn test_parse_tagged_data() {
        let msg = ClientMessage::from_json(
            r#"{"event":"terminal:data","payload":{"sessionId":"s1","data":"ls\n"}}"#,
        )
        .unwrap();
        assert_eq!(msg.session_id(), Some("s1"));
    }

    #[test]
    fn test_parse_legacy_bare_data() {
        let msg =
            ClientMessage::from_json(r#"{"event":"terminal:data","payload":"pwd\r"}"#).unwrap();
        match msg {
            ClientMessage::Data(req) => {
                assert_eq!(req.session_id, None);
                assert_eq!(req.data, "pwd\r");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_disconnect_without_payload() {
        let msg = ClientMessage::from_json(r#"{"event":"terminal:disconnect"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Disconnect(DisconnectRequest { session_id: None })));
    }

    #[test]
    fn test_parse_resize() {
        let msg = ClientMessage::from_json(
            r#"{"event":"terminal:resize","payload":{"sessionId":"s1","cols":200,"rows":50}}"#,
        )
        .unwrap();
        let ClientMessage::Resize(req) = msg else {
            panic!("expected resize");
        };
        assert_eq!(req.size(), TerminalSize::new(200, 50));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = ClientMessage::from_json(r#"{"event":"terminal:explode","payload":{}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(_)));
    }

    #[test]
    fn test_data_without_data_field_rejected() {
        let err = ClientMessage::from_json(r#"{"event":"terminal:data","payload":{"sessionId":"x"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("data")));
    }

    #[test]
    fn test_server_message_wire_shape() {
        let json = ServerMessage::data("s1", "hi").to_json();
        assert_eq!(
            json,
            r#"{"event":"terminal:data","payload":{"sessionId":"s1","data":"hi"}}"#
        );

        let closed = ServerMessage::Closed { session_id: None }.to_json();
        assert_eq!(closed, r#"{"event":"terminal:closed","payload":{}}"#);
    }

    #[test]
    fn test_server_message_parses_back() {
        let msg = ServerMessage::Connected {
            session_id: Some("s1".into()),
            host: "localhost".into(),
            username: "ops".into(),
            message: "Connected to local shell".into(),
        };
        let parsed: ServerMessage = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.event(), "terminal:connected");
    }
}
