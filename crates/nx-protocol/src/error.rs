//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding client messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match the expected shape
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope named an event this gateway does not handle
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// A required payload field was absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}
