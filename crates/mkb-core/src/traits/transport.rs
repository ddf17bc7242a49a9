//! Transport traits
//!
//! A streaming transport is split into a read half owned by the receive
//! loop and a write half owned by the session, so reads never wait behind
//! writes and vice versa.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::TransportError;

/// One unit of transport delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// Payload bytes; `fin` marks the last frame of a logical message
    Data { payload: Bytes, fin: bool },
    /// The peer closed the connection
    Closed { reason: Option<String> },
}

impl TransportFrame {
    /// A frame carrying a complete message
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self::Data {
            payload: payload.into(),
            fin: true,
        }
    }

    /// A non-final fragment of a message
    pub fn fragment(payload: impl Into<Bytes>) -> Self {
        Self::Data {
            payload: payload.into(),
            fin: false,
        }
    }
}

/// Read half of a streaming connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// Returns `TransportFrame::Closed` once the peer has closed; an `Err` is
    /// a fault the connection cannot recover from.
    async fn next_frame(&mut self) -> Result<TransportFrame, TransportError>;
}

/// Write half of a streaming connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete text message
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Start the closing handshake
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens streaming connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the opening handshake against `url`
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), TransportError>;
}
