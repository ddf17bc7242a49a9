//! Stream session
//!
//! Public face of the multiplexer. A session is single-use: it connects at
//! most once, and after it closes a new session has to be created.
//!
//! `StreamSession` is a cheap handle; clones share the same connection, so a
//! callback can hold one and shut the session down from inside a dispatch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use mkb_core::config::StreamConfig;
use mkb_core::error::{StreamError, TransportError};
use mkb_core::traits::{Connector, FrameSink};
use mkb_core::SessionState;
use mkb_protocol::{
    encode_envelope, ChannelConnectRequest, ChannelEvent, IdBody, MessageKind, SubscriptionId,
};

use crate::receive::{in_receive_loop, ReceiveLoop};
use crate::state::StateCell;
use crate::table::SubscriptionTable;

/// Handle to a streaming connection and its subscriptions
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Inner>,
}

/// State shared between session handles and the receive loop
pub(crate) struct Inner {
    pub(crate) config: StreamConfig,
    connector: Arc<dyn Connector>,
    pub(crate) state: StateCell,
    pub(crate) table: SubscriptionTable,
    /// Last allocated subscription id
    next_id: AtomicU32,
    /// Write half; one writer at a time
    writer: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    /// Cancelled by `close`
    shutdown: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
    pub(crate) span: tracing::Span,
}

impl StreamSession {
    /// Create an idle session
    pub fn new(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let span = tracing::info_span!("stream", host = %config.host);
        Self::with_span(config, connector, span)
    }

    /// Create an idle session whose logging happens inside `span`
    pub fn with_span(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        span: tracing::Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: StateCell::new(),
                table: SubscriptionTable::new(),
                next_id: AtomicU32::new(0),
                writer: tokio::sync::Mutex::new(None),
                shutdown: CancellationToken::new(),
                receive_task: Mutex::new(None),
                span,
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Watch lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Whether `id` is a live subscription
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.table.contains(id)
    }

    /// Open the streaming connection.
    ///
    /// `cancel` bounds the whole session: cancelling it aborts the handshake
    /// or, once open, stops the receive loop and closes the session. A
    /// cancelled handshake leaves the session `Closed` and is not an error.
    /// Calling this on a session that is not `Idle` logs a warning and does
    /// nothing.
    pub async fn connect(
        &self,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        let inner = &self.inner;
        if !inner.state.transition(SessionState::Idle, SessionState::Connecting) {
            tracing::warn!(
                parent: &inner.span,
                state = %inner.state.get(),
                "Session already used; ignoring connect"
            );
            return Ok(());
        }

        let url = match inner.config.endpoint(credential) {
            Ok(url) => url,
            Err(e) => {
                inner.state.set_closed();
                return Err(e.into());
            }
        };
        // never log the credential
        let mut endpoint = url.clone();
        endpoint.set_query(None);
        let endpoint = endpoint.to_string();

        tracing::info!(parent: &inner.span, %endpoint, "Connecting");
        let timeout = inner.config.connect_timeout;
        let handshake = tokio::time::timeout(timeout, inner.connector.connect(&url));

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(parent: &inner.span, "Connect cancelled");
                inner.state.set_closed();
                return Ok(());
            }
            _ = inner.shutdown.cancelled() => {
                tracing::info!(parent: &inner.span, "Session closed during connect");
                inner.state.set_closed();
                return Ok(());
            }
            result = handshake => result,
        };

        let (source, sink) = match result.unwrap_or(Err(TransportError::Timeout(timeout))) {
            Ok(halves) => halves,
            Err(source) => {
                tracing::error!(
                    parent: &inner.span,
                    %endpoint,
                    error = %source,
                    "Connection failed"
                );
                inner.state.set_closed();
                return Err(StreamError::ConnectionFailed { endpoint, source });
            }
        };

        *inner.writer.lock().await = Some(sink);

        // The handle is stored under the same lock that close() takes, so a
        // close() that sees Open always finds the loop to join.
        let opened = {
            let mut receive_task = inner
                .receive_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let opened = inner
                .state
                .transition(SessionState::Connecting, SessionState::Open);
            if opened {
                let receive = ReceiveLoop::new(
                    Arc::clone(inner),
                    source,
                    inner.shutdown.clone(),
                    cancel.clone(),
                );
                *receive_task = Some(tokio::spawn(
                    receive.run().instrument(inner.span.clone()),
                ));
            }
            opened
        };

        if !opened {
            // close() ran while the handshake was completing
            inner.close_writer().await;
            inner.state.set_closed();
            return Ok(());
        }

        tracing::info!(parent: &inner.span, %endpoint, "Connected");
        Ok(())
    }

    /// Send one envelope
    pub async fn send<B>(&self, kind: MessageKind, body: &B) -> Result<(), StreamError>
    where
        B: Serialize + ?Sized,
    {
        self.ensure_open()?;
        let text = encode_envelope(kind, body)?;
        if self.inner.config.trace_wire {
            tracing::trace!(parent: &self.inner.span, %kind, message = %text, "Sending message");
        }

        let mut writer = self.inner.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(StreamError::NotConnected(self.state()));
        };
        sink.send_text(text).await?;
        Ok(())
    }

    /// Subscribe to `channel`, routing its events to `callback`.
    ///
    /// The callback is registered before the connect request is written, so
    /// no event can arrive ahead of its registration. It runs on the receive
    /// loop's task and should return quickly.
    pub async fn subscribe<F>(
        &self,
        channel: &str,
        callback: F,
    ) -> Result<SubscriptionId, StreamError>
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.inner.allocate_id()?;
        self.inner.table.add(id, Arc::new(callback))?;

        let request = ChannelConnectRequest::new(id, channel);
        if let Err(e) = self.send(MessageKind::Connect, &request).await {
            self.inner.table.remove(id);
            return Err(e);
        }

        tracing::info!(parent: &self.inner.span, %id, channel, "Subscribed");
        Ok(id)
    }

    /// Drop a subscription.
    ///
    /// The disconnect is sent even when `id` is not registered locally, since
    /// the server may still hold the channel open.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StreamError> {
        if !self.inner.table.remove(id) {
            tracing::debug!(parent: &self.inner.span, %id, "Unsubscribing unknown id");
        }
        self.send(MessageKind::Disconnect, &IdBody::from(id)).await?;
        tracing::info!(parent: &self.inner.span, %id, "Unsubscribed");
        Ok(())
    }

    /// Mark a notification as read
    pub async fn read_notification(&self, notification_id: &str) -> Result<(), StreamError> {
        self.send(MessageKind::ReadNotification, &IdBody::new(notification_id))
            .await
    }

    /// Subscribe to updates of a single note
    pub async fn subscribe_note(&self, note_id: &str) -> Result<(), StreamError> {
        self.send(MessageKind::SubscribeNote, &IdBody::new(note_id))
            .await
    }

    /// Subscribe to a note and mark it read
    pub async fn subscribe_note_read(&self, note_id: &str) -> Result<(), StreamError> {
        self.send(MessageKind::SubscribeNoteRead, &IdBody::new(note_id))
            .await
    }

    /// Stop receiving updates for a note
    pub async fn unsubscribe_note(&self, note_id: &str) -> Result<(), StreamError> {
        self.send(MessageKind::UnsubscribeNote, &IdBody::new(note_id))
            .await
    }

    /// Ask the session to shut down without waiting for it.
    ///
    /// Safe to call from inside a callback. The receive loop finishes the
    /// transition to `Closed` when it exits.
    pub fn request_close(&self) {
        let previous = self.inner.state.begin_close();
        if matches!(previous, SessionState::Connecting | SessionState::Open) {
            tracing::info!(parent: &self.inner.span, "Close requested");
            self.inner.shutdown.cancel();
        }
    }

    /// Shut the session down and wait for the receive loop to exit.
    ///
    /// Idempotent. Returns the transport fault that ended the receive loop,
    /// if there was one; later calls return `Ok(())`. The wait is bounded by
    /// `close_timeout`, after which the loop is aborted.
    pub async fn close(&self) -> Result<(), StreamError> {
        let inner = &self.inner;
        let previous = inner.state.begin_close();
        let initiated = matches!(previous, SessionState::Connecting | SessionState::Open);

        if initiated {
            tracing::info!(parent: &inner.span, "Closing session");
            inner.shutdown.cancel();
            inner.close_writer().await;
        }

        let handle = inner
            .receive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = match handle {
            Some(_) if in_receive_loop() => {
                // joining here would wait on ourselves; the loop exits after
                // the current dispatch returns
                tracing::debug!(parent: &inner.span, "Close called from receive loop");
                Ok(())
            }
            Some(handle) => inner.join_receive_loop(handle).await,
            None => Ok(()),
        };

        // an aborted loop never reaches its own teardown
        if initiated || inner.state.get() != SessionState::Closed {
            inner.table.clear();
            inner.state.set_closed();
        }
        if initiated {
            tracing::info!(parent: &inner.span, "Session closed");
        }
        result
    }

    /// Wait until the session reaches `Closed`
    pub async fn wait_closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        match self.state() {
            SessionState::Open => Ok(()),
            state => Err(StreamError::NotConnected(state)),
        }
    }
}

impl Inner {
    /// Next subscription id. Ids start at 1 and are never handed out twice;
    /// once `u32::MAX` has been used the session refuses new subscriptions.
    fn allocate_id(&self) -> Result<SubscriptionId, StreamError> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .map(|last| SubscriptionId::new(last + 1))
            .map_err(|_| StreamError::SubscriptionIdsExhausted)
    }

    /// Close the write half if it is still open
    pub(crate) async fn close_writer(&self) {
        let timeout = self.config.close_timeout;
        let sink = match tokio::time::timeout(timeout, self.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                tracing::warn!(
                    parent: &self.span,
                    "Timed out waiting for in-flight write; leaving transport to drop"
                );
                return;
            }
        };

        if let Some(mut sink) = sink {
            match tokio::time::timeout(timeout, sink.close()).await {
                Ok(Ok(())) => tracing::debug!(parent: &self.span, "Transport closed"),
                Ok(Err(e)) => {
                    tracing::debug!(parent: &self.span, error = %e, "Transport close failed")
                }
                Err(_) => tracing::warn!(parent: &self.span, "Transport close timed out"),
            }
        }
    }

    /// Final teardown performed by the receive loop on its way out
    pub(crate) async fn finish(&self) {
        self.state
            .transition(SessionState::Open, SessionState::Closing);
        self.close_writer().await;
        self.table.clear();
        self.state.set_closed();
    }

    async fn join_receive_loop(
        &self,
        mut handle: JoinHandle<Result<(), TransportError>>,
    ) -> Result<(), StreamError> {
        match tokio::time::timeout(self.config.close_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(StreamError::Transport(e)),
            Ok(Err(e)) => {
                tracing::error!(
                    parent: &self.span,
                    error = %e,
                    "Receive loop terminated abnormally"
                );
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    parent: &self.span,
                    timeout = ?self.config.close_timeout,
                    "Receive loop did not exit in time; aborting it"
                );
                handle.abort();
                Ok(())
            }
        }
    }
}
