//! Receive loop
//!
//! One task per open session reads frames, reassembles them into messages,
//! decodes channel events, and dispatches them to the subscription table.
//! Processing is strictly sequential, so events for a subscription reach its
//! callback in wire order.
//!
//! Per-message problems (oversized, undecodable, unknown event type, a
//! panicking callback) are logged and skipped. The loop only ends on
//! cancellation, peer closure, or a transport fault; the fault is returned
//! from the task.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mkb_core::error::TransportError;
use mkb_core::traits::{FrameSource, TransportFrame};
use mkb_protocol::{decode_channel_event, decode_envelope, FrameReassembler, MessageKind};

use crate::session::Inner;

tokio::task_local! {
    static RECEIVE_LOOP: ();
}

/// Whether the current task is a session's receive loop
pub fn in_receive_loop() -> bool {
    RECEIVE_LOOP.try_with(|_| ()).is_ok()
}

/// Why the loop stopped
#[derive(Debug)]
enum Exit {
    Cancelled,
    PeerClosed(Option<String>),
    Fault(TransportError),
}

/// Reads and dispatches inbound messages for one session
pub(crate) struct ReceiveLoop {
    inner: Arc<Inner>,
    source: Box<dyn FrameSource>,
    /// Owned by this loop alone
    reassembler: FrameReassembler,
    /// Session shutdown (`close`)
    shutdown: CancellationToken,
    /// Caller's cancellation passed to `connect`
    external: CancellationToken,
}

impl ReceiveLoop {
    pub(crate) fn new(
        inner: Arc<Inner>,
        source: Box<dyn FrameSource>,
        shutdown: CancellationToken,
        external: CancellationToken,
    ) -> Self {
        let reassembler = FrameReassembler::new(inner.config.max_message_size);
        Self {
            inner,
            source,
            reassembler,
            shutdown,
            external,
        }
    }

    /// Run until cancellation, closure, or a transport fault
    pub(crate) async fn run(self) -> Result<(), TransportError> {
        RECEIVE_LOOP.scope((), self.run_scoped()).await
    }

    async fn run_scoped(mut self) -> Result<(), TransportError> {
        tracing::info!("Receive loop started");

        let exit = self.pump().await;

        if self.reassembler.is_partial() {
            let dropped = self.reassembler.discard();
            tracing::debug!(bytes = dropped, "Discarding partially received message");
        }

        let result = match exit {
            Exit::Cancelled => {
                tracing::debug!("Receive loop cancelled");
                Ok(())
            }
            Exit::PeerClosed(reason) => {
                let reason = reason.as_deref().unwrap_or("");
                tracing::info!(reason, "Server closed the stream");
                Ok(())
            }
            Exit::Fault(e) => {
                tracing::error!(error = %e, "Failed to receive message; closing session");
                Err(e)
            }
        };

        self.inner.finish().await;
        tracing::info!("Receive loop exited");
        result
    }

    async fn pump(&mut self) -> Exit {
        loop {
            if self.shutdown.is_cancelled() || self.external.is_cancelled() {
                return Exit::Cancelled;
            }

            let source = &mut self.source;
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Exit::Cancelled,
                _ = self.external.cancelled() => return Exit::Cancelled,
                frame = source.next_frame() => frame,
            };

            match frame {
                Ok(TransportFrame::Data { payload, fin }) => self.handle_frame(payload, fin),
                Ok(TransportFrame::Closed { reason }) => return Exit::PeerClosed(reason),
                Err(e) => return Exit::Fault(e),
            }
        }
    }

    fn handle_frame(&mut self, payload: Bytes, fin: bool) {
        let message = match self.reassembler.push(payload, fin) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping inbound message");
                return;
            }
        };

        if self.inner.config.trace_wire {
            tracing::trace!(message = %String::from_utf8_lossy(&message), "Received message");
        }

        let envelope = match decode_envelope(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse message");
                return;
            }
        };

        if envelope.kind != MessageKind::Channel {
            tracing::trace!(kind = %envelope.kind, "Ignoring non-channel message");
            return;
        }

        let event = match decode_channel_event(envelope.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed channel event");
                return;
            }
        };

        let id = event.id;
        let event_type = event.event_type;
        if self.inner.table.dispatch(id, event) {
            tracing::debug!(%id, %event_type, "Dispatched channel event");
        } else {
            tracing::debug!(%id, %event_type, "No subscription for channel event; dropped");
        }
    }
}
