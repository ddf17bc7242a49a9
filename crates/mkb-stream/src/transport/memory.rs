//! In-process transport
//!
//! [`memory_transport`] returns a connector for the session and the peer
//! end that plays the server: it injects frames, faults, and closures, and
//! observes what the session writes.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use url::Url;

use mkb_core::error::TransportError;
use mkb_core::traits::{Connector, FrameSink, FrameSource, TransportFrame};

type Inbound = Result<TransportFrame, TransportError>;

/// How the connector answers a handshake
#[derive(Debug, Clone)]
enum Handshake {
    Accept,
    Refuse(String),
    Hang,
}

/// State shared by the connector, the connection halves, and the peer
#[derive(Default)]
struct Shared {
    url: Mutex<Option<Url>>,
    sink_closed: AtomicBool,
    reject_writes: AtomicBool,
}

/// Connector half of an in-memory transport
pub struct MemoryConnector {
    handshake: Handshake,
    /// Taken by the first successful connect
    halves: Mutex<Option<(mpsc::UnboundedReceiver<Inbound>, mpsc::UnboundedSender<String>)>>,
    shared: Arc<Shared>,
}

/// Server end of an in-memory transport
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
}

/// Create a connected connector/peer pair
pub fn memory_transport() -> (MemoryConnector, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());

    let connector = MemoryConnector {
        handshake: Handshake::Accept,
        halves: Mutex::new(Some((inbound_rx, outbound_tx))),
        shared: Arc::clone(&shared),
    };
    let peer = MemoryPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        shared,
    };
    (connector, peer)
}

impl MemoryConnector {
    /// A connector whose handshake always fails with `reason`
    pub fn refusing(reason: impl Into<String>) -> Self {
        let (connector, _peer) = memory_transport();
        Self {
            handshake: Handshake::Refuse(reason.into()),
            ..connector
        }
    }

    /// A connector whose handshake never completes
    pub fn hanging() -> Self {
        let (connector, _peer) = memory_transport();
        Self {
            handshake: Handshake::Hang,
            ..connector
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn FrameSource>, Box<dyn FrameSink>), TransportError> {
        match &self.handshake {
            Handshake::Accept => {}
            Handshake::Refuse(reason) => return Err(TransportError::Handshake(reason.clone())),
            Handshake::Hang => std::future::pending::<()>().await,
        }

        let (inbound, outbound) = self
            .halves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::Handshake("transport already connected".to_string()))?;

        *self.shared.url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.clone());

        let source: Box<dyn FrameSource> = Box::new(MemorySource { inbound });
        let sink: Box<dyn FrameSink> = Box::new(MemorySink {
            outbound: Some(outbound),
            shared: Arc::clone(&self.shared),
        });
        Ok((source, sink))
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<TransportFrame, TransportError> {
        // a dropped peer reads as a closed connection
        self.inbound
            .recv()
            .await
            .unwrap_or(Ok(TransportFrame::Closed { reason: None }))
    }
}

struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<String>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.shared.reject_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Fault("write rejected by peer".to_string()));
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.shared.sink_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver a raw frame to the session
    pub fn send_frame(&self, frame: TransportFrame) {
        let _ = self.inbound.send(Ok(frame));
    }

    /// Deliver a complete text message
    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(TransportFrame::message(Bytes::from(text.into())));
    }

    /// Deliver `text` split into the given fragment sizes; the remainder
    /// goes in the final frame
    pub fn send_fragments(&self, text: &str, sizes: &[usize]) {
        let mut rest = Bytes::copy_from_slice(text.as_bytes());
        for &size in sizes {
            let part = rest.split_to(size.min(rest.len()));
            self.send_frame(TransportFrame::fragment(part));
        }
        self.send_frame(TransportFrame::message(rest));
    }

    /// Close the connection from the server side
    pub fn close(&self, reason: Option<&str>) {
        self.send_frame(TransportFrame::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Break the connection with a transport fault
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Err(TransportError::Fault(reason.into())));
    }

    /// Make every following write from the session fail
    pub fn reject_writes(&self) {
        self.shared.reject_writes.store(true, Ordering::SeqCst);
    }

    /// Next text message written by the session; `None` once its write half
    /// is closed and drained
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// A written message if one is already queued
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Whether the session closed its write half
    pub fn sink_closed(&self) -> bool {
        self.shared.sink_closed.load(Ordering::SeqCst)
    }

    /// Whether the session has let go of its read half
    pub fn source_dropped(&self) -> bool {
        self.inbound.is_closed()
    }

    /// URL the session connected to
    pub fn connected_url(&self) -> Option<Url> {
        self.shared
            .url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
