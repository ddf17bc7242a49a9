//! WebSocket transport
//!
//! The connection is split after the handshake: the read half goes to the
//! receive loop, the write half to the session's writer slot.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

use mkb_core::error::TransportError;
use mkb_core::traits::{Connector, FrameSink, FrameSource, TransportFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections (`ws://` and `wss://`)
///
/// tungstenite's own frame and message caps are lifted. Oversized messages
/// are rejected by the receive loop's reassembler, which drops them and keeps
/// reading, instead of surfacing as a fatal read error.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_frame_size = None;
        config.max_message_size = None;
        config
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), TransportError> {
        let config = Some(self.ws_config());
        let (stream, response) = connect_async_with_config(url.as_str(), config, false)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        let source: Box<dyn FrameSource> = Box::new(WebSocketSource { inner: source });
        let sink: Box<dyn FrameSink> = Box::new(WebSocketSink { inner: sink });
        Ok((source, sink))
    }
}

/// Read half of a WebSocket connection
pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<TransportFrame, TransportError> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(TransportFrame::Closed { reason: None })
                }
                Some(Err(WsError::Io(e))) => return Err(TransportError::Io(e)),
                Some(Err(e)) => return Err(TransportError::Fault(e.to_string())),
            };

            match message {
                Message::Text(text) => return Ok(TransportFrame::message(text)),
                Message::Binary(data) => return Ok(TransportFrame::message(data)),
                Message::Frame(frame) => {
                    let fin = frame.header().is_final;
                    return Ok(TransportFrame::Data {
                        payload: Bytes::from(frame.into_data()),
                        fin,
                    });
                }
                Message::Close(frame) => {
                    return Ok(TransportFrame::Closed {
                        reason: frame
                            .map(|f| f.reason.into_owned())
                            .filter(|reason| !reason.is_empty()),
                    })
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }
}

/// Write half of a WebSocket connection
pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await.map_err(map_write_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_write_error(e)),
        }
    }
}

fn map_write_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(e) => TransportError::Io(e),
        other => TransportError::Fault(other.to_string()),
    }
}
