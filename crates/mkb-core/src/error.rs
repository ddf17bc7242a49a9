//! Core error types for mkbridge

use mkb_protocol::{ProtocolError, SubscriptionId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::SessionState;

/// Top-level error type for the mkbridge crates
#[derive(Error, Debug)]
pub enum MkbError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Stream session error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Actuator error
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults reported by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Opening handshake was refused or failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Handshake did not complete in time
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Read or write failed on an established connection
    #[error("Connection fault: {0}")]
    Fault(String),

    /// Operation on a connection that is already closed
    #[error("Connection closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream session errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Transport handshake could not complete; the session is finished
    #[error("Connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// Operation needs an open session
    #[error("Not connected (session is {0})")]
    NotConnected(SessionState),

    /// Subscription id already registered
    #[error("Duplicate subscription: {0}")]
    DuplicateSubscription(SubscriptionId),

    /// Every subscription id this session can hand out has been used
    #[error("Subscription ids exhausted")]
    SubscriptionIdsExhausted,

    /// Transport failed during an operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be encoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Endpoint could not be built from configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Actuator collaborator errors
#[derive(Error, Debug)]
pub enum ActuatorError {
    /// Command issued before `connect`
    #[error("Actuator server not connected")]
    NotConnected,

    /// Device handle is not known to the server
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
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

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Endpoint URL could not be built
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}
