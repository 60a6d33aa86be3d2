#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for karaoke queue client integration tests.
//!
//! Provides a channel-free scripted [`MockTransport`], a [`MockConnector`]
//! that hands out a scripted sequence of transports (or failures), and
//! helpers for constructing common server message JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use karaoke_queue_client::protocol::{
    NowPlayingPayload, PreparePayload, QueueItem, QueueItemStatus, QueueUpdatedPayload, Role,
    ServerErrorPayload, Session, SessionEndedPayload, SessionStatePayload, SessionStatus, User,
    WelcomePayload,
};
use karaoke_queue_client::{Connector, ErrorCode, KaraokeError, ServerMessage, Transport};

/// Install a `tracing` subscriber honoring `RUST_LOG` for test debugging.
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport for integration testing.
///
/// Scripted server responses are consumed in order by `recv()`; once the
/// script runs out, `recv()` hangs so the connection stays up. All messages
/// sent by the client are recorded in `sent`.
pub struct MockTransport {
    /// Scripted server responses (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, KaraokeError>>>,
    /// Recorded outgoing messages from the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a mock transport with the given scripted incoming messages.
    ///
    /// Returns the transport plus shared handles for inspecting sent
    /// messages and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, KaraokeError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), KaraokeError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, KaraokeError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // Script exhausted; hang so the connection stays up until the
            // manager tears it down.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), KaraokeError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// A connector that yields a scripted sequence of transports.
///
/// Each `connect()` call pops the next scripted outcome; once the script is
/// exhausted, further calls fail like a refused connection. The total number
/// of attempts is recorded in `attempts`.
pub struct MockConnector {
    outcomes: StdMutex<VecDeque<Result<MockTransport, KaraokeError>>>,
    pub attempts: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new(outcomes: Vec<Result<MockTransport, KaraokeError>>) -> Self {
        Self {
            outcomes: StdMutex::new(VecDeque::from(outcomes)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A connector that hands out exactly one transport.
    pub fn single(transport: MockTransport) -> Self {
        Self::new(vec![Ok(transport)])
    }

    /// A connector whose every attempt fails.
    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, KaraokeError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(KaraokeError::Io(std::io::Error::other(
                "connection refused",
            ))),
        }
    }
}

// ── Fixture builders ────────────────────────────────────────────────

/// A connected user with the given id, nickname, and role.
pub fn user(id: &str, nickname: &str, role: Role) -> User {
    User {
        id: id.into(),
        nickname: nickname.into(),
        role,
        is_connected: true,
        connected_at: "2026-01-01T20:00:00Z".into(),
    }
}

/// A queued item at the given position.
pub fn queue_item(id: &str, singer_id: &str, title: &str, position: u32) -> QueueItem {
    QueueItem {
        id: id.into(),
        singer_id: singer_id.into(),
        singer_nickname: "Alice".into(),
        title: title.into(),
        status: QueueItemStatus::Queued,
        position: Some(position),
        queued_at: "2026-01-01T20:05:00Z".into(),
    }
}

/// An active session hosted by `host_id`.
pub fn session(id: &str, host_id: &str) -> Session {
    Session {
        id: id.into(),
        name: "Friday Night".into(),
        status: SessionStatus::Active,
        host_id: host_id.into(),
        created_at: "2026-01-01T19:00:00Z".into(),
        participant_count: 2,
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// Returns the JSON string for a `welcome` server message.
pub fn welcome_json(reconnect_token: Option<&str>) -> String {
    serde_json::to_string(&ServerMessage::Welcome(WelcomePayload {
        user: user("u1", "Alice", Role::Host),
        session_id: "s1".into(),
        reconnect_token: reconnect_token.map(Into::into),
    }))
    .expect("welcome_json serialization")
}

/// Returns the JSON string for a `sessionState` server message with one
/// queued song and no current performer.
pub fn session_state_json() -> String {
    let payload = SessionStatePayload {
        session: session("s1", "u1"),
        users: vec![
            user("u1", "Alice", Role::Host),
            user("u2", "Bob", Role::Participant),
        ],
        queue: vec![queue_item("q1", "u2", "My Way", 0)],
        current_song: None,
    };
    serde_json::to_string(&ServerMessage::SessionState(Box::new(payload)))
        .expect("session_state_json serialization")
}

/// Returns the JSON string for a `queueUpdated` server message.
pub fn queue_updated_json(queue: Vec<QueueItem>) -> String {
    serde_json::to_string(&ServerMessage::QueueUpdated(QueueUpdatedPayload { queue }))
        .expect("queue_updated_json serialization")
}

/// Returns the JSON string for a `nowPlaying` server message.
pub fn now_playing_json(item: Option<QueueItem>, next_up: Option<QueueItem>) -> String {
    serde_json::to_string(&ServerMessage::NowPlaying(NowPlayingPayload { item, next_up }))
        .expect("now_playing_json serialization")
}

/// Returns the JSON string for a `prepare` server message.
pub fn prepare_json(item: QueueItem, seconds_until_turn: u32) -> String {
    serde_json::to_string(&ServerMessage::Prepare(PreparePayload {
        item,
        message: "You're up soon!".into(),
        seconds_until_turn,
    }))
    .expect("prepare_json serialization")
}

/// Returns the JSON string for a `userJoined` server message.
pub fn user_joined_json(joined: User) -> String {
    serde_json::to_string(&ServerMessage::UserJoined { user: joined })
        .expect("user_joined_json serialization")
}

/// Returns the JSON string for a `userLeft` server message.
pub fn user_left_json(user_id: &str) -> String {
    serde_json::to_string(&ServerMessage::UserLeft {
        user_id: user_id.into(),
    })
    .expect("user_left_json serialization")
}

/// Returns the JSON string for a `sessionEnded` server message.
pub fn session_ended_json(reason: &str) -> String {
    serde_json::to_string(&ServerMessage::SessionEnded(SessionEndedPayload {
        reason: reason.into(),
    }))
    .expect("session_ended_json serialization")
}

/// Returns the JSON string for a server `error` message.
pub fn error_json(code: ErrorCode, message: &str) -> String {
    serde_json::to_string(&ServerMessage::Error(ServerErrorPayload {
        code,
        message: message.into(),
    }))
    .expect("error_json serialization")
}
