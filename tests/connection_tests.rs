#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the connection manager: lifecycle, command
//! serialization, automatic reconnection, and the resume protocol.

mod common;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use common::{error_json, session_state_json, welcome_json, MockConnector, MockTransport};
use karaoke_queue_client::storage::RECONNECT_TOKEN_KEY;
use karaoke_queue_client::{
    ConnectionManager, ConnectionStatus, ErrorCode, JoinParams, KaraokeError, MemoryTokenStore,
    ReconnectTokenStore, RetryConfig, ServerMessage,
};

/// A tight retry policy so failure tests finish quickly. Also installs the
/// log subscriber, since every test starts here.
fn fast_retry() -> RetryConfig {
    common::init_tracing();
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

/// Poll until the manager reaches `expected`, or panic after one second.
async fn wait_for_status(manager: &ConnectionManager, expected: ConnectionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while manager.status() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected:?}, still {:?}",
            manager.status()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn connect_reaches_connected_through_connecting() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let connector = Arc::new(MockConnector::single(transport));
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );

    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _sub = manager.on_status_change(move |status| {
        seen_clone.lock().unwrap().push(status);
    });

    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
        ]
    );
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test]
async fn connect_is_idempotent_while_live() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let connector = Arc::new(MockConnector::single(transport));
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );

    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.connect();
    manager.connect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test]
async fn disconnect_stops_everything_and_clears_the_token() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let store = Arc::new(MemoryTokenStore::new());
    store.set(RECONNECT_TOKEN_KEY, "tok-1").await.unwrap();

    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    manager.disconnect();
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(!manager.is_allocated());

    // The persisted clear is fire-and-forget; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get(RECONNECT_TOKEN_KEY).await.unwrap().is_none());
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_fail_fast_before_connect() {
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::always_failing()),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    assert!(matches!(
        manager.join(JoinParams::new("Alice")),
        Err(KaraokeError::NotConnected)
    ));
    assert!(matches!(
        manager.pause_session(),
        Err(KaraokeError::NotConnected)
    ));
}

#[tokio::test]
async fn commands_reach_the_transport_as_wire_json() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    manager
        .join(JoinParams::new("Alice").with_session_id("s1"))
        .unwrap();
    manager.request_song("My Way").unwrap();
    manager.remove_song("q1").unwrap();
    manager.next_song().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 4);
    assert!(sent[0].contains(r#""type":"join"#));
    assert!(sent[0].contains(r#""sessionId":"s1""#));
    assert!(sent[1].contains(r#""type":"requestSong"#));
    assert!(sent[2].contains(r#""queueItemId":"q1""#));
    assert!(sent[3].contains(r#""type":"nextSong"#));
}

// ── Message delivery ────────────────────────────────────────────────

#[tokio::test]
async fn message_stream_delivers_the_two_phase_handshake() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok(welcome_json(Some("tok-1")))),
        Some(Ok(session_state_json())),
    ]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let mut stream = manager.message_stream().unwrap();
    let first = stream.recv().await.unwrap();
    assert!(matches!(first, ServerMessage::Welcome(_)));
    let second = stream.recv().await.unwrap();
    assert!(matches!(second, ServerMessage::SessionState(_)));

    // The stream is handed out once per epoch.
    assert!(matches!(
        manager.message_stream(),
        Err(KaraokeError::NotConnected)
    ));
}

#[tokio::test]
async fn welcome_token_is_persisted() {
    let (transport, _sent, _closed) =
        MockTransport::new(vec![Some(Ok(welcome_json(Some("tok-fresh"))))]);
    let store = Arc::new(MemoryTokenStore::new());
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        store.get(RECONNECT_TOKEN_KEY).await.unwrap().as_deref(),
        Some("tok-fresh")
    );
}

#[tokio::test]
async fn malformed_inbound_json_is_skipped() {
    let (transport, _sent, _closed) = MockTransport::new(vec![
        Some(Ok("{not json".into())),
        Some(Ok(welcome_json(None))),
    ]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    let mut stream = manager.message_stream().unwrap();
    // The malformed line never surfaces; the next valid message does.
    let msg = stream.recv().await.unwrap();
    assert!(matches!(msg, ServerMessage::Welcome(_)));
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn transport_error_triggers_reconnect_with_fresh_transport() {
    let (dying, _sent1, _closed1) = MockTransport::new(vec![Some(Err(
        KaraokeError::TransportReceive("connection reset".into()),
    ))]);
    let (replacement, _sent2, _closed2) = MockTransport::new(vec![]);
    let connector = Arc::new(MockConnector::new(vec![Ok(dying), Ok(replacement)]));
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();

    // The first transport fails immediately; the manager must end up
    // connected on the second.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test]
async fn server_clean_close_is_terminal() {
    let (transport, _sent, _closed) = MockTransport::new(vec![None]);
    let connector = Arc::new(MockConnector::single(transport));
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;

    // No retry after a deliberate server close.
    assert_eq!(connector.attempt_count(), 1);
    assert!(!manager.is_allocated());
}

#[tokio::test]
async fn exhausted_retry_budget_gives_up_and_clears_the_token() {
    let store = Arc::new(MemoryTokenStore::new());
    store.set(RECONNECT_TOKEN_KEY, "tok-stale").await.unwrap();

    let connector = Arc::new(MockConnector::always_failing());
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(connector.attempt_count(), 3);
    assert!(store.get(RECONNECT_TOKEN_KEY).await.unwrap().is_none());
}

// ── Resume protocol ─────────────────────────────────────────────────

#[tokio::test]
async fn persisted_token_triggers_automatic_resume() {
    let store = Arc::new(MemoryTokenStore::new());
    store.set(RECONNECT_TOKEN_KEY, "abc123").await.unwrap();

    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(r#""type":"reconnect"#));
    assert!(sent[0].contains(r#""reconnectToken":"abc123""#));
}

#[tokio::test]
async fn resume_is_sent_exactly_once_across_quick_reconnects() {
    let store = Arc::new(MemoryTokenStore::new());
    store.set(RECONNECT_TOKEN_KEY, "abc123").await.unwrap();

    // First transport dies before the server can answer the resume.
    let (dying, sent1, _c1) = MockTransport::new(vec![Some(Err(
        KaraokeError::TransportReceive("connection reset".into()),
    ))]);
    let (replacement, sent2, _c2) = MockTransport::new(vec![]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::new(vec![Ok(dying), Ok(replacement)])),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let total_reconnects = sent1
        .lock()
        .unwrap()
        .iter()
        .chain(sent2.lock().unwrap().iter())
        .filter(|m| m.contains(r#""type":"reconnect"#))
        .count();
    assert_eq!(total_reconnects, 1);
}

#[tokio::test]
async fn no_token_means_no_resume_attempt() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resume_failure_clears_the_token() {
    let store = Arc::new(MemoryTokenStore::new());
    store.set(RECONNECT_TOKEN_KEY, "expired").await.unwrap();

    // The token-invalid and session-discarded cases behave identically:
    // forget the token, disconnect, require a manual join.
    let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(error_json(
        ErrorCode::InvalidReconnectToken,
        "Invalid reconnect token",
    )))]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.get(RECONNECT_TOKEN_KEY).await.unwrap().is_none());
}

// ── Terminal errors ─────────────────────────────────────────────────

#[tokio::test]
async fn terminal_error_forces_disconnect_and_forgets_the_token() {
    let store = Arc::new(MemoryTokenStore::new());

    let (transport, _sent, closed) = MockTransport::new(vec![
        Some(Ok(welcome_json(Some("tok-1")))),
        Some(Ok(error_json(ErrorCode::SessionEnded, "The host ended it"))),
    ]);
    let connector = Arc::new(MockConnector::single(transport));
    let manager = ConnectionManager::with_retry(
        Arc::clone(&connector) as Arc<dyn karaoke_queue_client::Connector>,
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // No reconnection attempt, transport closed, token gone.
    assert_eq!(connector.attempt_count(), 1);
    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
    assert!(store.get(RECONNECT_TOKEN_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn connect_after_terminal_error_does_not_resume() {
    let store = Arc::new(MemoryTokenStore::new());

    let (first, _sent1, _c1) = MockTransport::new(vec![
        Some(Ok(welcome_json(Some("tok-1")))),
        Some(Ok(error_json(
            ErrorCode::UserAlreadyConnected,
            "Connected elsewhere",
        ))),
    ]);
    let (second, sent2, _c2) = MockTransport::new(vec![]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::new(vec![Ok(first), Ok(second)])),
        Arc::clone(&store) as Arc<dyn ReconnectTokenStore>,
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;

    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The forgotten token must not produce a resume attempt.
    assert!(sent2.lock().unwrap().is_empty());
}

#[tokio::test]
async fn terminal_error_still_reaches_the_message_stream() {
    let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(error_json(
        ErrorCode::SessionExpired,
        "Session expired",
    )))]);
    let manager = ConnectionManager::with_retry(
        Arc::new(MockConnector::single(transport)),
        Arc::new(MemoryTokenStore::new()),
        fast_retry(),
    );
    manager.connect();
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    let mut stream = manager.message_stream().unwrap();

    // The error is forwarded before the forced disconnect.
    let msg = stream.recv().await.unwrap();
    let ServerMessage::Error(payload) = msg else {
        panic!("expected error message");
    };
    assert_eq!(payload.code, ErrorCode::SessionExpired);
    wait_for_status(&manager, ConnectionStatus::Disconnected).await;
}
