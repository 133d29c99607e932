//! nx-protocol: Client channel protocol for the Nexus console gateway
//!
//! This crate defines the JSON messages exchanged between a dashboard or
//! mobile client and the gateway over one persistent channel, and the
//! identifiers used to multiplex many shell sessions over that channel.

pub mod error;
pub mod message;
pub mod session;

pub use error::ProtocolError;
pub use message::{
    ClientMessage, ConnectRequest, Credential, DataRequest, DisconnectRequest, ResizeRequest,
    ServerMessage, TerminalSize,
};
pub use session::{ConnectionId, SessionKey};
