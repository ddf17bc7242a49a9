//! Stream session integration tests
//!
//! Drives a full session (connect, subscribe, receive loop, close) against
//! the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use mkb_core::config::StreamConfig;
use mkb_core::error::{StreamError, TransportError};
use mkb_core::SessionState;
use mkb_protocol::{ChannelEvent, ChannelEventType, SubscriptionId};
use mkb_stream::{memory_transport, MemoryConnector, MemoryPeer, StreamSession};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> StreamConfig {
    StreamConfig::new("misskey.example")
}

/// Open a session over a fresh in-memory transport
async fn open_session(config: StreamConfig) -> (StreamSession, MemoryPeer) {
    let (connector, peer) = memory_transport();
    let session = StreamSession::new(config, Arc::new(connector));
    session
        .connect("token", &CancellationToken::new())
        .await
        .expect("connect failed");
    assert_eq!(session.state(), SessionState::Open);
    (session, peer)
}

/// Subscribe with a callback that forwards every event to a channel
async fn subscribe_collecting(
    session: &StreamSession,
    channel: &str,
) -> (SubscriptionId, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = session
        .subscribe(channel, move |event| {
            let _ = tx.send(event);
        })
        .await
        .expect("subscribe failed");
    (id, rx)
}

fn channel_event(id: u32, event_type: &str, body: serde_json::Value) -> String {
    json!({
        "type": "channel",
        "body": {"id": id.to_string(), "type": event_type, "body": body}
    })
    .to_string()
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("callback channel closed")
}

async fn wait_closed(session: &StreamSession) {
    timeout(WAIT, session.wait_closed())
        .await
        .expect("session did not close");
}

#[tokio::test]
async fn test_connect_uses_credential_query() {
    let (_session, peer) = open_session(config()).await;
    let url = peer.connected_url().expect("not connected");
    assert_eq!(url.as_str(), "wss://misskey.example/?i=token");
}

#[tokio::test]
async fn test_subscribe_sends_connect_and_dispatches_once() {
    let (session, mut peer) = open_session(config()).await;
    let (id, mut rx) = subscribe_collecting(&session, "main").await;

    assert_eq!(id, SubscriptionId::new(1));
    assert_eq!(
        peer.next_sent().await.as_deref(),
        Some(r#"{"type":"connect","body":{"id":"1","channel":"main"}}"#)
    );

    peer.send_text(channel_event(1, "notification", json!({"id": "n1"})));
    let event = next_event(&mut rx).await;
    assert_eq!(event.id, id);
    assert_eq!(event.event_type, ChannelEventType::Notification);
    assert_eq!(event.payload, json!({"id": "n1"}));

    // a second event proves the first was not delivered twice
    peer.send_text(channel_event(1, "mention", json!({"id": "n2"})));
    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type, ChannelEventType::Mention);
    assert!(rx.try_recv().is_err());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_subscription_is_dropped() {
    let (session, peer) = open_session(config()).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    peer.send_text(channel_event(2, "followed", json!({"id": "u"})));
    peer.send_text(channel_event(1, "followed", json!({"id": "v"})));

    let event = next_event(&mut rx).await;
    assert_eq!(event.payload, json!({"id": "v"}));
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_fragmented_message_is_reassembled() {
    let (session, peer) = open_session(config()).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    let text = channel_event(1, "reply", json!({"note": {"text": "héllo wörld"}}));
    peer.send_fragments(&text, &[1, 7, 13]);

    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type, ChannelEventType::Reply);
    assert_eq!(event.payload, json!({"note": {"text": "héllo wörld"}}));
}

#[tokio::test]
async fn test_close_mid_message_discards_partial() {
    let (session, peer) = open_session(config()).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    let text = channel_event(1, "notification", json!({}));
    peer.send_frame(mkb_core::traits::TransportFrame::fragment(
        text.as_bytes()[..10].to_vec(),
    ));
    peer.close(Some("bye"));

    wait_closed(&session).await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.subscription_count(), 0);
    assert!(rx.try_recv().is_err());
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_malformed_messages_are_skipped() {
    let (session, peer) = open_session(config()).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    peer.send_text("not json");
    peer.send_text(r#"{"type":"channel","body":{"id":"1","type":"brandNewEvent","body":{}}}"#);
    peer.send_text(r#"{"type":"channel","body":{"id":"1","type":"mention","body":"text"}}"#);
    peer.send_text(r#"{"type":"noteUpdated","body":{"id":"x"}}"#);
    peer.send_text(channel_event(1, "renote", json!({"id": "ok"})));

    let event = next_event(&mut rx).await;
    assert_eq!(event.event_type, ChannelEventType::Renote);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_oversized_message_is_dropped() {
    let mut config = config();
    config.max_message_size = 128;
    let (session, peer) = open_session(config).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    let big = channel_event(1, "mention", json!({"text": "x".repeat(512)}));
    peer.send_fragments(&big, &[100, 100]);
    peer.send_text(channel_event(1, "mention", json!({"text": "small"})));

    let event = next_event(&mut rx).await;
    assert_eq!(event.payload, json!({"text": "small"}));
}

#[tokio::test]
async fn test_events_dispatched_in_order() {
    let (session, peer) = open_session(config()).await;
    let (_, mut rx) = subscribe_collecting(&session, "main").await;

    for n in 0..100 {
        peer.send_text(channel_event(1, "mention", json!({"n": n})));
    }
    for n in 0..100 {
        assert_eq!(next_event(&mut rx).await.payload, json!({"n": n}));
    }
}

#[tokio::test]
async fn test_ids_are_never_reused() {
    let (session, _peer) = open_session(config()).await;

    let mut ids = Vec::new();
    for channel in ["main", "homeTimeline", "localTimeline"] {
        ids.push(subscribe_collecting(&session, channel).await.0);
    }
    session.unsubscribe(ids[1]).await.unwrap();
    ids.push(subscribe_collecting(&session, "main").await.0);

    assert_eq!(
        ids,
        vec![
            SubscriptionId::new(1),
            SubscriptionId::new(2),
            SubscriptionId::new(3),
            SubscriptionId::new(4)
        ]
    );
    assert_eq!(session.subscription_count(), 3);
}

#[tokio::test]
async fn test_concurrent_subscribes_get_distinct_ids() {
    let (session, _peer) = open_session(config()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session.subscribe("main", |_| {}).await.unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().as_u32());
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=16).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unsubscribe_sends_disconnect_and_drops_late_events() {
    let (session, mut peer) = open_session(config()).await;
    let (first, mut first_rx) = subscribe_collecting(&session, "main").await;
    let (_, mut second_rx) = subscribe_collecting(&session, "main").await;
    peer.next_sent().await;
    peer.next_sent().await;

    session.unsubscribe(first).await.unwrap();
    assert_eq!(
        peer.next_sent().await.as_deref(),
        Some(r#"{"type":"disconnect","body":{"id":"1"}}"#)
    );
    assert!(!session.is_subscribed(first));

    peer.send_text(channel_event(1, "notification", json!({})));
    peer.send_text(channel_event(2, "notification", json!({})));
    next_event(&mut second_rx).await;
    assert!(first_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_unknown_id_still_sends() {
    let (session, mut peer) = open_session(config()).await;

    session.unsubscribe(SubscriptionId::new(7)).await.unwrap();
    assert_eq!(
        peer.next_sent().await.as_deref(),
        Some(r#"{"type":"disconnect","body":{"id":"7"}}"#)
    );
}

#[tokio::test]
async fn test_note_and_notification_requests() {
    let (session, mut peer) = open_session(config()).await;

    session.read_notification("n1").await.unwrap();
    session.subscribe_note("a").await.unwrap();
    session.subscribe_note_read("b").await.unwrap();
    session.unsubscribe_note("c").await.unwrap();

    let expected = [
        r#"{"type":"readNotification","body":{"id":"n1"}}"#,
        r#"{"type":"s","body":{"id":"a"}}"#,
        r#"{"type":"sr","body":{"id":"b"}}"#,
        r#"{"type":"un","body":{"id":"c"}}"#,
    ];
    for message in expected {
        assert_eq!(peer.next_sent().await.as_deref(), Some(message));
    }
}

#[tokio::test]
async fn test_operations_require_open_session() {
    let (connector, _peer) = memory_transport();
    let session = StreamSession::new(config(), Arc::new(connector));

    let err = session.subscribe("main", |_| {}).await.unwrap_err();
    assert!(matches!(err, StreamError::NotConnected(SessionState::Idle)));

    session.close().await.unwrap();
    let err = session.subscribe("main", |_| {}).await.unwrap_err();
    assert!(matches!(err, StreamError::NotConnected(SessionState::Closed)));
    assert!(matches!(
        session.read_notification("n").await,
        Err(StreamError::NotConnected(SessionState::Closed))
    ));
}

#[tokio::test]
async fn test_session_is_single_use() {
    let (session, _peer) = open_session(config()).await;

    // second connect is a no-op
    session
        .connect("token", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Open);

    session.close().await.unwrap();
    session
        .connect("token", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (session, peer) = open_session(config()).await;
    let (_, _rx) = subscribe_collecting(&session, "main").await;

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.subscription_count(), 0);
    assert!(peer.sink_closed());

    session.close().await.unwrap();
    session.request_close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_state_changes_observe_close() {
    let (session, _peer) = open_session(config()).await;
    let mut changes = session.state_changes();

    session.close().await.unwrap();
    timeout(WAIT, changes.wait_for(|state| *state == SessionState::Closed))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_refused_handshake() {
    let session = StreamSession::new(
        config(),
        Arc::new(MemoryConnector::refusing("401 Unauthorized")),
    );

    let err = session
        .connect("bad", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        StreamError::ConnectionFailed { endpoint, source } => {
            assert_eq!(endpoint, "wss://misskey.example/");
            assert!(matches!(source, TransportError::Handshake(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let mut config = config();
    config.connect_timeout = Duration::from_secs(3);
    let session = StreamSession::new(config, Arc::new(MemoryConnector::hanging()));

    let err = session
        .connect("token", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::ConnectionFailed {
            source: TransportError::Timeout(_),
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_invalid_host_fails_connect() {
    let (connector, _peer) = memory_transport();
    let session = StreamSession::new(StreamConfig::default(), Arc::new(connector));

    let err = session
        .connect("token", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Config(_)));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_cancel_during_handshake() {
    let session = StreamSession::new(config(), Arc::new(MemoryConnector::hanging()));
    let cancel = CancellationToken::new();

    let connecting = {
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { session.connect("token", &cancel).await })
    };
    let mut changes = session.state_changes();
    timeout(WAIT, changes.wait_for(|state| *state == SessionState::Connecting))
        .await
        .unwrap()
        .unwrap();

    cancel.cancel();
    let result = timeout(WAIT, connecting).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_close_during_handshake() {
    let session = StreamSession::new(config(), Arc::new(MemoryConnector::hanging()));

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect("token", &CancellationToken::new()).await })
    };
    let mut changes = session.state_changes();
    timeout(WAIT, changes.wait_for(|state| *state == SessionState::Connecting))
        .await
        .unwrap()
        .unwrap();

    session.close().await.unwrap();
    assert!(timeout(WAIT, connecting).await.unwrap().unwrap().is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_cancel_stops_open_session() {
    let (connector, peer) = memory_transport();
    let session = StreamSession::new(config(), Arc::new(connector));
    let cancel = CancellationToken::new();
    session.connect("token", &cancel).await.unwrap();

    cancel.cancel();
    wait_closed(&session).await;
    assert!(peer.sink_closed());
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_request_close_from_callback() {
    let (session, peer) = open_session(config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = session.clone();
    session
        .subscribe("main", move |event| {
            handle.request_close();
            let _ = tx.send(event);
        })
        .await
        .unwrap();

    peer.send_text(channel_event(1, "notification", json!({"n": 1})));
    peer.send_text(channel_event(1, "notification", json!({"n": 2})));

    assert_eq!(next_event(&mut rx).await.payload, json!({"n": 1}));
    wait_closed(&session).await;
    assert!(rx.try_recv().is_err());
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_close_spawned_from_callback() {
    let (session, peer) = open_session(config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = session.clone();
    session
        .subscribe("main", move |_| {
            let session = handle.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(session.close().await);
            });
        })
        .await
        .unwrap();

    peer.send_text(channel_event(1, "mention", json!({})));

    let result = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_transport_fault_surfaces_from_close() {
    let (session, peer) = open_session(config()).await;

    peer.fail("connection reset");
    wait_closed(&session).await;

    match session.close().await {
        Err(StreamError::Transport(TransportError::Fault(reason))) => {
            assert_eq!(reason, "connection reset")
        }
        other => panic!("expected transport fault, got {other:?}"),
    }
    // reported once
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_failed_subscribe_is_rolled_back() {
    let (session, peer) = open_session(config()).await;
    peer.reject_writes();

    let err = session.subscribe("main", |_| {}).await.unwrap_err();
    assert!(matches!(err, StreamError::Transport(TransportError::Fault(_))));
    assert_eq!(session.subscription_count(), 0);
    assert!(!session.is_subscribed(SubscriptionId::new(1)));
}

#[tokio::test]
async fn test_close_bounded_by_slow_callback() {
    let mut config = config();
    config.close_timeout = Duration::from_millis(200);
    let (session, peer) = open_session(config).await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    session
        .subscribe("main", move |_| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(50));
        })
        .await
        .unwrap();

    peer.send_text(channel_event(1, "notification", json!({})));
    timeout(WAIT, started_rx.recv()).await.unwrap();

    timeout(WAIT, session.close()).await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_panicking_callback_leaves_session_usable() {
    let (session, peer) = open_session(config()).await;
    session
        .subscribe("main", |_| panic!("callback failure"))
        .await
        .unwrap();
    let (_, mut rx) = subscribe_collecting(&session, "homeTimeline").await;

    peer.send_text(channel_event(1, "mention", json!({"n": 1})));
    peer.send_text(channel_event(2, "mention", json!({"n": 2})));

    assert_eq!(next_event(&mut rx).await.payload, json!({"n": 2}));
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.is_subscribed(SubscriptionId::new(1)));

    session.close().await.unwrap();
    wait_closed(&session).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_racing_connect_waits_for_receive_loop() {
    for _ in 0..50 {
        let (connector, peer) = memory_transport();
        let session = StreamSession::new(config(), Arc::new(connector));

        let mut states = session.state_changes();
        let closer = {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = states.wait_for(|state| *state == SessionState::Open).await;
                session.close().await
            })
        };

        session
            .connect("token", &CancellationToken::new())
            .await
            .unwrap();
        timeout(WAIT, closer).await.unwrap().unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(peer.source_dropped());
    }
}
