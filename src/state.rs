//! Session state, the pure reducer, and the store that owns them.
//!
//! [`reduce`] is a pure, total `(state, action) -> state` function — no I/O,
//! no timers, no hidden state. It is the sole place business-relevant client
//! state is computed, so the UI can never observe a half-updated snapshot.
//!
//! [`SessionStore`] is the single mutator: it applies [`reduce`] under a
//! mutex and publishes each new snapshot on a `tokio::sync::watch` channel
//! for consumers to observe.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

use crate::protocol::{
    NowPlayingPayload, PreparePayload, QueueItem, QueueUpdatedPayload, ServerErrorPayload,
    ServerMessage, Session, SessionEndedPayload, SessionId, SessionStatePayload, User, UserId,
    WelcomePayload,
};

// ── Connection status ───────────────────────────────────────────────

/// Status of the single transport connection.
///
/// Owned by the [`ConnectionManager`](crate::connection::ConnectionManager)
/// and mirrored into [`SessionState`] by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No transport, or the connection was torn down. Terminal until the
    /// caller invokes `connect()` again.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Transport live; server messages flow.
    Connected,
    /// Transport lost; automatic retry in progress.
    Reconnecting,
}

// ── State ───────────────────────────────────────────────────────────

/// UI-ready snapshot of the client's view of the session.
///
/// Mutated exclusively by [`reduce`]. The queue is always stored exactly as
/// received — ordering is server-authoritative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    /// Current user, set by `welcome`.
    pub user: Option<User>,
    /// Set by `welcome`, before the full snapshot arrives (two-phase handshake).
    pub session_id: Option<SessionId>,
    /// Set by `sessionState`.
    pub session: Option<Session>,
    pub users: Vec<User>,
    pub queue: Vec<QueueItem>,
    pub current_song: Option<QueueItem>,
    pub next_up: Option<QueueItem>,
    /// Pending heads-up for the next performer. Always references an item id
    /// consistent with `queue`/`current_song`, or is cleared in the same
    /// transition that would otherwise orphan it.
    pub prepare_notification: Option<PreparePayload>,
    /// Last application error, dismissible via [`SessionAction::ClearError`].
    pub last_error: Option<ServerErrorPayload>,
    /// Why the session ended, if the server ended it.
    pub session_ended_reason: Option<String>,
}

// ── Actions ─────────────────────────────────────────────────────────

/// Inputs to the reducer.
///
/// One variant per server message plus the locally originated status,
/// dismissal, and reset actions.
#[derive(Debug, Clone)]
pub enum SessionAction {
    ConnectionStatusChanged(ConnectionStatus),
    Welcome(WelcomePayload),
    SessionState(Box<SessionStatePayload>),
    QueueUpdated(QueueUpdatedPayload),
    NowPlaying(NowPlayingPayload),
    Prepare(PreparePayload),
    UserJoined(User),
    UserLeft(UserId),
    SessionEnded(SessionEndedPayload),
    Error(ServerErrorPayload),
    ClearError,
    ClearPrepareNotification,
    Reset,
}

impl From<ServerMessage> for SessionAction {
    /// The 1:1 message-to-action translation used by the bridge. Payloads
    /// pass through unmodified.
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Welcome(p) => Self::Welcome(p),
            ServerMessage::SessionState(p) => Self::SessionState(p),
            ServerMessage::QueueUpdated(p) => Self::QueueUpdated(p),
            ServerMessage::NowPlaying(p) => Self::NowPlaying(p),
            ServerMessage::Prepare(p) => Self::Prepare(p),
            ServerMessage::UserJoined { user } => Self::UserJoined(user),
            ServerMessage::UserLeft { user_id } => Self::UserLeft(user_id),
            ServerMessage::SessionEnded(p) => Self::SessionEnded(p),
            ServerMessage::Error(p) => Self::Error(p),
        }
    }
}

// ── Reducer ─────────────────────────────────────────────────────────

/// Pure state-transition function.
pub fn reduce(state: SessionState, action: SessionAction) -> SessionState {
    match action {
        SessionAction::ConnectionStatusChanged(status) => {
            // A full disconnect invalidates everything we know: the server
            // may have ended the session while we were away.
            if status == ConnectionStatus::Disconnected {
                debug!("disconnected, resetting session state");
                return SessionState {
                    connection_status: ConnectionStatus::Disconnected,
                    ..SessionState::default()
                };
            }
            SessionState {
                connection_status: status,
                ..state
            }
        }

        SessionAction::Welcome(payload) => {
            // Identity only; the full snapshot arrives with SessionState.
            debug!(session_id = %payload.session_id, "welcome");
            SessionState {
                user: Some(payload.user),
                session_id: Some(payload.session_id),
                last_error: None,
                session_ended_reason: None,
                prepare_notification: None,
                ..state
            }
        }

        SessionAction::SessionState(payload) => {
            debug!(
                session = %payload.session.id,
                users = payload.users.len(),
                queue = payload.queue.len(),
                "session state"
            );
            SessionState {
                session: Some(payload.session),
                users: payload.users,
                queue: payload.queue,
                current_song: payload.current_song,
                ..state
            }
        }

        SessionAction::QueueUpdated(payload) => {
            // Drop the prepare notification if its item left the queue.
            let prepare_notification = state.prepare_notification.filter(|notif| {
                payload.queue.iter().any(|item| item.id == notif.item.id)
            });
            SessionState {
                queue: payload.queue,
                prepare_notification,
                ..state
            }
        }

        SessionAction::NowPlaying(payload) => {
            // The notification is stale once its song starts playing.
            let prepare_notification = state.prepare_notification.filter(|notif| {
                payload
                    .item
                    .as_ref()
                    .is_none_or(|item| item.id != notif.item.id)
            });
            SessionState {
                current_song: payload.item,
                next_up: payload.next_up,
                prepare_notification,
                ..state
            }
        }

        SessionAction::Prepare(payload) => SessionState {
            // Last write wins.
            prepare_notification: Some(payload),
            ..state
        },

        SessionAction::UserJoined(user) => {
            // Upsert by id: a rejoin carries refreshed info for an existing user.
            let mut users = state.users;
            match users.iter_mut().find(|u| u.id == user.id) {
                Some(existing) => *existing = user,
                None => users.push(user),
            }
            SessionState { users, ..state }
        }

        SessionAction::UserLeft(user_id) => {
            let mut users = state.users;
            users.retain(|u| u.id != user_id);
            SessionState { users, ..state }
        }

        SessionAction::SessionEnded(payload) => SessionState {
            session_ended_reason: Some(payload.reason),
            session_id: None,
            session: None,
            users: Vec::new(),
            queue: Vec::new(),
            current_song: None,
            next_up: None,
            prepare_notification: None,
            ..state
        },

        SessionAction::Error(payload) => {
            debug!(code = ?payload.code, message = %payload.message, "server error");
            SessionState {
                last_error: Some(payload),
                ..state
            }
        }

        SessionAction::ClearError => SessionState {
            last_error: None,
            ..state
        },

        SessionAction::ClearPrepareNotification => SessionState {
            prepare_notification: None,
            ..state
        },

        SessionAction::Reset => SessionState {
            connection_status: state.connection_status,
            ..SessionState::default()
        },
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Owns the current [`SessionState`] and applies [`reduce`] to it.
///
/// Dispatching is serialized under one mutex; observers receive every new
/// snapshot through a `watch` channel and can always read the latest state
/// without blocking dispatchers.
#[derive(Debug)]
pub struct SessionStore {
    state: Mutex<SessionState>,
    tx: watch::Sender<SessionState>,
}

impl SessionStore {
    /// Create a store holding the initial state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self {
            state: Mutex::new(SessionState::default()),
            tx,
        }
    }

    /// Apply an action and publish the resulting snapshot.
    pub fn dispatch(&self, action: SessionAction) {
        let next = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                // A poisoned lock means a panic mid-reduce; recover the data.
                Err(poisoned) => poisoned.into_inner(),
            };
            let next = reduce(state.clone(), action);
            *state = next.clone();
            next
        };
        // Nobody watching is fine.
        let _ = self.tx.send(next);
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe to state snapshots. The receiver immediately holds the
    /// current state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Dismiss the last error.
    pub fn clear_error(&self) {
        self.dispatch(SessionAction::ClearError);
    }

    /// Dismiss the prepare notification.
    pub fn clear_prepare_notification(&self) {
        self.dispatch(SessionAction::ClearPrepareNotification);
    }

    /// Reset to the initial state, preserving the connection status.
    pub fn reset(&self) {
        self.dispatch(SessionAction::Reset);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error_codes::ErrorCode;
    use crate::protocol::{QueueItemStatus, Role, SessionStatus};

    fn user(id: &str, nickname: &str) -> User {
        User {
            id: id.into(),
            nickname: nickname.into(),
            role: Role::Participant,
            is_connected: true,
            connected_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn item(id: &str, title: &str) -> QueueItem {
        QueueItem {
            id: id.into(),
            singer_id: "u1".into(),
            singer_nickname: "Alice".into(),
            title: title.into(),
            status: QueueItemStatus::Queued,
            position: Some(0),
            queued_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.into(),
            name: "Friday Night".into(),
            status: SessionStatus::Active,
            host_id: "host".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            participant_count: 3,
        }
    }

    fn prepare(item_id: &str) -> PreparePayload {
        PreparePayload {
            item: item(item_id, "My Way"),
            message: "You're up next!".into(),
            seconds_until_turn: 30,
        }
    }

    fn populated_state() -> SessionState {
        SessionState {
            connection_status: ConnectionStatus::Connected,
            user: Some(user("u1", "Alice")),
            session_id: Some("s1".into()),
            session: Some(session("s1")),
            users: vec![user("u1", "Alice"), user("u2", "Bob")],
            queue: vec![item("q1", "My Way"), item("q2", "Yesterday")],
            current_song: Some(item("q0", "Imagine")),
            next_up: Some(item("q1", "My Way")),
            prepare_notification: Some(prepare("q1")),
            last_error: None,
            session_ended_reason: None,
        }
    }

    #[test]
    fn disconnected_resets_to_initial_state() {
        let state = populated_state();
        let next = reduce(
            state,
            SessionAction::ConnectionStatusChanged(ConnectionStatus::Disconnected),
        );
        assert_eq!(
            next,
            SessionState {
                connection_status: ConnectionStatus::Disconnected,
                ..SessionState::default()
            }
        );
    }

    #[test]
    fn other_status_changes_touch_only_connection_status() {
        let state = populated_state();
        let mut expected = state.clone();
        expected.connection_status = ConnectionStatus::Reconnecting;
        let next = reduce(
            state,
            SessionAction::ConnectionStatusChanged(ConnectionStatus::Reconnecting),
        );
        assert_eq!(next, expected);
    }

    #[test]
    fn welcome_sets_identity_and_clears_stale_flags() {
        let mut state = populated_state();
        state.last_error = Some(ServerErrorPayload {
            code: ErrorCode::InternalError,
            message: "boom".into(),
        });
        state.session_ended_reason = Some("host left".into());

        let next = reduce(
            state,
            SessionAction::Welcome(WelcomePayload {
                user: user("u9", "Carol"),
                session_id: "s9".into(),
                reconnect_token: Some("tok".into()),
            }),
        );

        assert_eq!(next.user.as_ref().unwrap().id, "u9");
        assert_eq!(next.session_id.as_deref(), Some("s9"));
        assert!(next.last_error.is_none());
        assert!(next.session_ended_reason.is_none());
        assert!(next.prepare_notification.is_none());
        // Session untouched: snapshot arrives in phase two.
        assert!(next.session.is_some());
    }

    #[test]
    fn two_phase_handshake_welcome_then_session_state() {
        let welcomed = reduce(
            SessionState::default(),
            SessionAction::Welcome(WelcomePayload {
                user: user("u1", "Alice"),
                session_id: "S1".into(),
                reconnect_token: None,
            }),
        );
        assert_eq!(welcomed.session_id.as_deref(), Some("S1"));
        assert!(welcomed.session.is_none());

        let next = reduce(
            welcomed,
            SessionAction::SessionState(Box::new(SessionStatePayload {
                session: session("S1"),
                users: vec![user("u1", "Alice")],
                queue: vec![],
                current_song: None,
            })),
        );
        assert_eq!(next.user.as_ref().unwrap().id, "u1");
        assert_eq!(next.session_id.as_deref(), Some("S1"));
        assert_eq!(next.session.as_ref().unwrap().id, "S1");
        assert!(next.queue.is_empty());
    }

    #[test]
    fn session_state_replaces_four_fields_verbatim() {
        let state = populated_state();
        let new_queue = vec![item("q7", "Hey Jude")];
        let next = reduce(
            state,
            SessionAction::SessionState(Box::new(SessionStatePayload {
                session: session("s2"),
                users: vec![user("u3", "Dave")],
                queue: new_queue.clone(),
                current_song: None,
            })),
        );
        assert_eq!(next.session.as_ref().unwrap().id, "s2");
        assert_eq!(next.users.len(), 1);
        assert_eq!(next.queue, new_queue);
        assert!(next.current_song.is_none());
    }

    #[test]
    fn queue_updated_keeps_prepare_when_item_survives() {
        let state = populated_state();
        let next = reduce(
            state,
            SessionAction::QueueUpdated(QueueUpdatedPayload {
                queue: vec![item("q1", "My Way"), item("q3", "Let It Be")],
            }),
        );
        assert!(next.prepare_notification.is_some());
        assert_eq!(next.queue.len(), 2);
    }

    #[test]
    fn queue_updated_clears_orphaned_prepare() {
        let state = populated_state();
        let next = reduce(
            state,
            SessionAction::QueueUpdated(QueueUpdatedPayload {
                queue: vec![item("q3", "Let It Be")],
            }),
        );
        assert!(next.prepare_notification.is_none());
    }

    #[test]
    fn queue_order_is_stored_as_received() {
        let queue = vec![item("z", "Z"), item("a", "A"), item("m", "M")];
        let next = reduce(
            SessionState::default(),
            SessionAction::QueueUpdated(QueueUpdatedPayload {
                queue: queue.clone(),
            }),
        );
        assert_eq!(next.queue, queue);
    }

    #[test]
    fn now_playing_clears_prepare_for_that_item() {
        let state = populated_state(); // prepare references q1
        let next = reduce(
            state,
            SessionAction::NowPlaying(NowPlayingPayload {
                item: Some(item("q1", "My Way")),
                next_up: Some(item("q2", "Yesterday")),
            }),
        );
        assert!(next.prepare_notification.is_none());
        assert_eq!(next.current_song.as_ref().unwrap().id, "q1");
        assert_eq!(next.next_up.as_ref().unwrap().id, "q2");
    }

    #[test]
    fn now_playing_keeps_prepare_for_other_item() {
        let state = populated_state(); // prepare references q1
        let next = reduce(
            state,
            SessionAction::NowPlaying(NowPlayingPayload {
                item: Some(item("q5", "Wonderwall")),
                next_up: None,
            }),
        );
        assert!(next.prepare_notification.is_some());
    }

    #[test]
    fn now_playing_null_item_keeps_prepare() {
        let state = populated_state();
        let next = reduce(
            state,
            SessionAction::NowPlaying(NowPlayingPayload {
                item: None,
                next_up: None,
            }),
        );
        assert!(next.current_song.is_none());
        assert!(next.prepare_notification.is_some());
    }

    #[test]
    fn prepare_last_write_wins() {
        let state = reduce(populated_state(), SessionAction::Prepare(prepare("q2")));
        assert_eq!(state.prepare_notification.unwrap().item.id, "q2");
    }

    #[test]
    fn user_joined_is_idempotent_upsert() {
        let state = SessionState::default();
        let once = reduce(state.clone(), SessionAction::UserJoined(user("u1", "Alice")));
        let twice = reduce(
            once.clone(),
            SessionAction::UserJoined(user("u1", "Alice")),
        );
        assert_eq!(once.users, twice.users);
        assert_eq!(twice.users.len(), 1);
    }

    #[test]
    fn user_joined_updates_existing_user_in_place() {
        let state = populated_state();
        let mut rejoined = user("u2", "Bobby");
        rejoined.is_connected = false;
        let next = reduce(state, SessionAction::UserJoined(rejoined));
        assert_eq!(next.users.len(), 2);
        // Position preserved, info replaced.
        assert_eq!(next.users[1].nickname, "Bobby");
        assert!(!next.users[1].is_connected);
    }

    #[test]
    fn user_left_removes_by_id_and_ignores_unknown() {
        let state = populated_state();
        let next = reduce(state, SessionAction::UserLeft("u2".into()));
        assert_eq!(next.users.len(), 1);
        let next = reduce(next, SessionAction::UserLeft("nobody".into()));
        assert_eq!(next.users.len(), 1);
    }

    #[test]
    fn session_ended_clears_session_fields_but_not_connection() {
        let state = populated_state();
        let next = reduce(
            state,
            SessionAction::SessionEnded(SessionEndedPayload {
                reason: "host ended the session".into(),
            }),
        );
        assert_eq!(next.session_ended_reason.as_deref(), Some("host ended the session"));
        assert!(next.session_id.is_none());
        assert!(next.session.is_none());
        assert!(next.users.is_empty());
        assert!(next.queue.is_empty());
        assert!(next.current_song.is_none());
        assert!(next.next_up.is_none());
        assert!(next.prepare_notification.is_none());
        assert_eq!(next.connection_status, ConnectionStatus::Connected);
        // User identity survives so the UI can offer a rejoin.
        assert!(next.user.is_some());
    }

    #[test]
    fn error_changes_only_last_error() {
        let state = populated_state();
        let mut expected = state.clone();
        let payload = ServerErrorPayload {
            code: ErrorCode::Unknown,
            message: "m".into(),
        };
        expected.last_error = Some(payload.clone());
        let next = reduce(state, SessionAction::Error(payload));
        assert_eq!(next, expected);
    }

    #[test]
    fn clear_error_and_clear_prepare() {
        let mut state = populated_state();
        state.last_error = Some(ServerErrorPayload {
            code: ErrorCode::HostOnly,
            message: "nope".into(),
        });
        let next = reduce(state, SessionAction::ClearError);
        assert!(next.last_error.is_none());
        let next = reduce(next, SessionAction::ClearPrepareNotification);
        assert!(next.prepare_notification.is_none());
    }

    #[test]
    fn reset_preserves_connection_status_only() {
        for status in [
            ConnectionStatus::Connected,
            ConnectionStatus::Reconnecting,
            ConnectionStatus::Connecting,
        ] {
            let mut state = populated_state();
            state.connection_status = status;
            let next = reduce(state, SessionAction::Reset);
            assert_eq!(
                next,
                SessionState {
                    connection_status: status,
                    ..SessionState::default()
                }
            );
        }
    }

    #[test]
    fn store_dispatch_publishes_snapshots() {
        let store = SessionStore::new();
        let rx = store.subscribe();
        store.dispatch(SessionAction::ConnectionStatusChanged(
            ConnectionStatus::Connecting,
        ));
        assert_eq!(
            rx.borrow().connection_status,
            ConnectionStatus::Connecting
        );
        assert_eq!(store.state().connection_status, ConnectionStatus::Connecting);
    }

    #[test]
    fn store_helpers_dispatch_expected_actions() {
        let store = SessionStore::new();
        store.dispatch(SessionAction::Error(ServerErrorPayload {
            code: ErrorCode::SessionFull,
            message: "full".into(),
        }));
        store.dispatch(SessionAction::Prepare(prepare("q1")));
        store.clear_error();
        assert!(store.state().last_error.is_none());
        store.clear_prepare_notification();
        assert!(store.state().prepare_notification.is_none());
        store.reset();
        assert_eq!(store.state(), SessionState::default());
    }
}
