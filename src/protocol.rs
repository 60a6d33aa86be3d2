//! Wire-compatible protocol types for the karaoke queue protocol.
//!
//! Every type in this module produces identical JSON to the server's message
//! schema: message envelopes are externally tagged as
//! `{"type": "...", "data": {...}}` with camelCase message and field names,
//! enum values are `SCREAMING_SNAKE_CASE`, and timestamps travel as ISO 8601
//! `String`s.
//!
//! All identifiers are opaque server-issued strings; the client never
//! generates or interprets them.

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for users. Opaque, server-issued.
pub type UserId = String;

/// Unique identifier for sessions. Opaque, server-issued.
pub type SessionId = String;

/// Unique identifier for queue items. Opaque, server-issued.
pub type QueueItemId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Role of a user within a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Created the session and advances the queue.
    Host,
    /// Joined an existing session and submits songs.
    Participant,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created but not yet started.
    #[default]
    Waiting,
    /// Songs are being performed.
    Active,
    /// Temporarily paused by the host.
    Paused,
    /// Ended; no further activity.
    Ended,
}

/// Status of a single queue item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Next up; the singer has been notified to prepare.
    Preparing,
    /// Currently being performed.
    Performing,
    /// Performed to completion.
    Completed,
    /// Skipped by the host or removed by the singer.
    Skipped,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A user participating in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    pub role: Role,
    pub is_connected: bool,
    /// ISO 8601 timestamp of when the user connected.
    pub connected_at: String,
}

/// A karaoke session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub host_id: UserId,
    /// ISO 8601 timestamp of when the session was created.
    pub created_at: String,
    pub participant_count: u32,
}

/// A song request in the queue.
///
/// The queue arrives pre-ordered from the server; the client stores it
/// exactly as received and never re-sorts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: QueueItemId,
    pub singer_id: UserId,
    pub singer_nickname: String,
    pub title: String,
    pub status: QueueItemStatus,
    /// 0-based position in the queue, `null` once the item leaves the queue.
    pub position: Option<u32>,
    /// ISO 8601 timestamp of when the song was requested.
    pub queued_at: String,
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload for the `welcome` server message.
///
/// First message after a successful `join` or `reconnect`. Carries identity
/// only — the full session snapshot follows separately in `sessionState`
/// (two-phase handshake).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub user: User,
    pub session_id: SessionId,
    /// Fresh resume token. Issued on join and rotated on every successful
    /// resume. Absent on servers that do not support resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<String>,
}

/// Payload for the `sessionState` server message.
/// Boxed in [`ServerMessage`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatePayload {
    pub session: Session,
    pub users: Vec<User>,
    /// Pre-ordered by the server.
    pub queue: Vec<QueueItem>,
    pub current_song: Option<QueueItem>,
}

/// Payload for the `queueUpdated` server message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdatedPayload {
    /// Pre-ordered by the server.
    pub queue: Vec<QueueItem>,
}

/// Payload for the `nowPlaying` server message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NowPlayingPayload {
    /// The song now being performed, or `null` when playback stops.
    pub item: Option<QueueItem>,
    /// The next song in the queue, if any.
    pub next_up: Option<QueueItem>,
}

/// Payload for the `prepare` server message, notifying the next performer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreparePayload {
    pub item: QueueItem,
    pub message: String,
    pub seconds_until_turn: u32,
}

/// Payload for the `sessionEnded` server message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedPayload {
    pub reason: String,
}

/// Payload for the `error` server message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

// ── Messages ────────────────────────────────────────────────────────

/// Commands sent from client to server.
///
/// Each command serializes to exactly one outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Join a session. With `session_id` → join as participant; without →
    /// create a new session as host.
    Join {
        nickname: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// Request a song (participants).
    RequestSong { title: String },
    /// Remove a song from the queue.
    RemoveSong { queue_item_id: QueueItemId },
    /// Advance to the next song (host only).
    NextSong,
    /// Pause the session (host only).
    PauseSession,
    /// Resume the session (host only).
    ResumeSession,
    /// End the session (host only).
    EndSession,
    /// Resume an existing identity/session with a previously issued token.
    Reconnect { reconnect_token: String },
}

/// Messages pushed from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Identity confirmation after join or resume (phase one of the
    /// handshake; `sessionState` follows with the full snapshot).
    Welcome(WelcomePayload),
    /// Full session snapshot (boxed to reduce enum size).
    SessionState(Box<SessionStatePayload>),
    /// The queue changed.
    QueueUpdated(QueueUpdatedPayload),
    /// The currently performing song changed.
    NowPlaying(NowPlayingPayload),
    /// Heads-up for the next performer.
    Prepare(PreparePayload),
    /// A user joined (or reconnected to) the session.
    UserJoined { user: User },
    /// A user left the session.
    UserLeft { user_id: UserId },
    /// The session ended.
    SessionEnded(SessionEndedPayload),
    /// An application-level error.
    Error(ServerErrorPayload),
}
