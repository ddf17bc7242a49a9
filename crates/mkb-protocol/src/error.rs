//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound message is not an envelope we can route
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope body does not have the expected shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Wire token not present in the translation table
    #[error("Unknown {kind} token: {token:?}")]
    UnknownToken { kind: &'static str, token: String },

    /// Reassembled message exceeds the configured maximum
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
