//! Connection lifecycle management for the karaoke queue client.
//!
//! [`ConnectionManager`] is the single owner of the transport connection. It
//! runs one background task per connection lifetime that establishes the
//! transport (with bounded retry/backoff), pumps commands out and server
//! messages in, and drives the token-based resume protocol. Status changes
//! are pushed to registered observers; inbound messages are handed to the
//! [`EventDispatchBridge`](crate::bridge::EventDispatchBridge) through a
//! per-epoch [`MessageStream`].
//!
//! # Resume protocol
//!
//! After every transition into [`Connected`](ConnectionStatus::Connected)
//! the manager attempts an application-level resume: if a token is cached in
//! memory or persisted in the [`TokenStorage`], it emits exactly one
//! `reconnect` command and then waits passively for the server's `welcome`
//! (success — the rotated token is persisted) or a resume-failure error
//! (the token is cleared and a manual `join` is required). A single
//! in-flight flag collapses overlapping triggers into one round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{KaraokeError, Result};
use crate::protocol::{ClientCommand, QueueItemId, ServerMessage, SessionId};
use crate::state::ConnectionStatus;
use crate::storage::{ReconnectTokenStore, TokenStorage};
use crate::transport::{Connector, Transport};

// ── Configuration ───────────────────────────────────────────────────

/// Bounded retry/backoff policy for automatic reconnection.
///
/// Delays double between attempts up to `max_delay`. Once `max_attempts`
/// consecutive attempts fail, the manager gives up: status becomes
/// [`Disconnected`](ConnectionStatus::Disconnected), the resume token is
/// cleared, and a fresh manual `join` is required.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum consecutive connection attempts. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

// ── JoinParams ──────────────────────────────────────────────────────

/// Parameters for joining (or creating) a session.
///
/// Leave `session_id` as `None` to create a new session as host.
///
/// # Example
///
/// ```
/// use karaoke_queue_client::connection::JoinParams;
///
/// let params = JoinParams::new("Alice").with_session_id("s1");
/// assert_eq!(params.nickname, "Alice");
/// assert_eq!(params.session_id.as_deref(), Some("s1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct JoinParams {
    /// Display name for the joining user.
    pub nickname: String,
    /// Session to join. `None` = create a new session as host.
    pub session_id: Option<SessionId>,
}

impl JoinParams {
    /// Create join parameters with the required nickname.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            session_id: None,
        }
    }

    /// Set an explicit session id to join as participant.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ── Message stream ──────────────────────────────────────────────────

/// Inbound server messages for one connection epoch.
///
/// Handed out once per epoch via [`ConnectionManager::message_stream`]. When
/// the underlying transport is replaced the manager drops the sending half,
/// so a stream from a prior epoch ends instead of delivering stale messages
/// into the new connection.
#[derive(Debug)]
pub struct MessageStream {
    epoch: u64,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl MessageStream {
    /// The connection epoch this stream belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Receive the next server message; `None` once this epoch is over.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

// ── Status subscription ─────────────────────────────────────────────

type StatusListener = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Guard for a status-change subscription.
///
/// The listener stays registered until this guard is dropped or
/// [`unsubscribe`](StatusSubscription::unsubscribe) is called.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct StatusSubscription {
    shared: Weak<Shared>,
    id: u64,
}

impl StatusSubscription {
    /// Explicitly unregister the listener.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.listeners).remove(&self.id);
        }
    }
}

impl std::fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSubscription")
            .field("id", &self.id)
            .finish()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the manager handle and the background run task.
struct Shared {
    status: StdMutex<ConnectionStatus>,
    listeners: StdMutex<HashMap<u64, StatusListener>>,
    next_listener_id: AtomicU64,
    /// Bumped every time the transport handle is replaced.
    epoch: AtomicU64,
    /// Present while a transport is allocated (between connect and teardown).
    cmd_tx: StdMutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
    /// The current epoch's inbound stream, waiting for the bridge to take it.
    pending_stream: StdMutex<Option<MessageStream>>,
    /// In-memory copy of the resume token; storage holds the durable copy.
    reconnect_token: StdMutex<Option<String>>,
    /// Collapses overlapping resume triggers into one round trip.
    resume_in_flight: AtomicBool,
    storage: TokenStorage,
}

/// Lock a std mutex, recovering from poisoning.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn set_status(shared: &Shared, status: ConnectionStatus) {
    {
        let mut current = lock(&shared.status);
        if *current == status {
            return;
        }
        *current = status;
    }
    debug!(?status, "connection status changed");
    // Invoke listeners outside the lock so they may call back into the manager.
    let listeners: Vec<StatusListener> = lock(&shared.listeners).values().cloned().collect();
    for listener in listeners {
        listener(status);
    }
}

// ── ConnectionManager ───────────────────────────────────────────────

/// Single owner of the transport connection.
///
/// Construct one instance at the application's composition root and share it
/// by reference — there is no hidden global. All methods require a Tokio
/// runtime context.
///
/// # Example
///
/// ```rust,ignore
/// let manager = ConnectionManager::new(
///     Arc::new(WebSocketConnector::new("wss://example.com/karaoke")),
///     Arc::new(MemoryTokenStore::new()),
/// );
/// manager.connect();
/// manager.join(JoinParams::new("Alice"))?;
/// ```
pub struct ConnectionManager {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    retry: RetryConfig,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager with the default [`RetryConfig`].
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn ReconnectTokenStore>) -> Self {
        Self::with_retry(connector, store, RetryConfig::default())
    }

    /// Create a manager with a custom retry policy.
    pub fn with_retry(
        connector: Arc<dyn Connector>,
        store: Arc<dyn ReconnectTokenStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: StdMutex::new(ConnectionStatus::Disconnected),
                listeners: StdMutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                cmd_tx: StdMutex::new(None),
                pending_stream: StdMutex::new(None),
                reconnect_token: StdMutex::new(None),
                resume_in_flight: AtomicBool::new(false),
                storage: TokenStorage::new(store),
            }),
            connector,
            retry,
            task: StdMutex::new(None),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start (or re-activate) the connection. Idempotent.
    ///
    /// Never emits a business `join` — joining remains an explicit caller
    /// action after the connection is up.
    pub fn connect(&self) {
        let mut task = lock(&self.task);
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("connect: run task already live, no-op");
                return;
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *lock(&self.shared.cmd_tx) = Some(cmd_tx);
        set_status(&self.shared, ConnectionStatus::Connecting);

        let shared = Arc::clone(&self.shared);
        let connector = Arc::clone(&self.connector);
        let retry = self.retry.clone();
        *task = Some(tokio::spawn(run(shared, connector, retry, cmd_rx)));
    }

    /// Tear down the connection. Idempotent.
    ///
    /// Event delivery stops synchronously (the run task is aborted before
    /// anything else), so no action can be dispatched from a connection the
    /// caller has already asked to destroy. The in-memory token is cleared
    /// immediately; the persisted copy is cleared fire-and-forget.
    pub fn disconnect(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        *lock(&self.shared.cmd_tx) = None;
        *lock(&self.shared.pending_stream) = None;
        *lock(&self.shared.reconnect_token) = None;
        self.shared.resume_in_flight.store(false, Ordering::Release);

        let storage = self.shared.storage.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { storage.clear_reconnect_token().await });
        } else {
            warn!("disconnect outside a runtime; persisted token not cleared");
        }

        set_status(&self.shared, ConnectionStatus::Disconnected);
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *lock(&self.shared.status)
    }

    /// Returns `true` while a transport is allocated (commands will queue).
    pub fn is_allocated(&self) -> bool {
        lock(&self.shared.cmd_tx).is_some()
    }

    /// The current connection epoch.
    ///
    /// Bumped every time the transport handle is replaced. Consumers holding
    /// a [`MessageStream`] can compare its [`epoch`](MessageStream::epoch)
    /// against this value to tell a live stream from a superseded one.
    pub fn current_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    /// Register a status observer.
    ///
    /// The listener is invoked immediately with the current status, then on
    /// every change until the returned guard is dropped.
    pub fn on_status_change(
        &self,
        listener: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: StatusListener = Arc::new(listener);
        lock(&self.shared.listeners).insert(id, Arc::clone(&listener));
        listener(self.status());
        StatusSubscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Take the inbound message stream for the current connection epoch.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] when no transport handle is
    /// obtainable this cycle — either nothing is allocated, or the current
    /// epoch's stream was already taken.
    pub fn message_stream(&self) -> Result<MessageStream> {
        lock(&self.shared.pending_stream)
            .take()
            .ok_or(KaraokeError::NotConnected)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Join a session (or create one when `session_id` is absent).
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn join(&self, params: JoinParams) -> Result<()> {
        self.send(ClientCommand::Join {
            nickname: params.nickname,
            session_id: params.session_id,
        })
    }

    /// Request a song.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn request_song(&self, title: impl Into<String>) -> Result<()> {
        self.send(ClientCommand::RequestSong {
            title: title.into(),
        })
    }

    /// Remove a song from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn remove_song(&self, queue_item_id: impl Into<QueueItemId>) -> Result<()> {
        self.send(ClientCommand::RemoveSong {
            queue_item_id: queue_item_id.into(),
        })
    }

    /// Advance to the next song (host only).
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn next_song(&self) -> Result<()> {
        self.send(ClientCommand::NextSong)
    }

    /// Pause the session (host only).
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn pause_session(&self) -> Result<()> {
        self.send(ClientCommand::PauseSession)
    }

    /// Resume the session (host only).
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn resume_session(&self) -> Result<()> {
        self.send(ClientCommand::ResumeSession)
    }

    /// End the session (host only).
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn end_session(&self) -> Result<()> {
        self.send(ClientCommand::EndSession)
    }

    /// Explicitly attempt a resume with a specific token.
    ///
    /// Normally the manager resumes automatically; this exists for callers
    /// that manage tokens themselves.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::NotConnected`] if no transport is allocated.
    pub fn reconnect(&self, reconnect_token: impl Into<String>) -> Result<()> {
        self.send(ClientCommand::Reconnect {
            reconnect_token: reconnect_token.into(),
        })
    }

    /// Cache and persist a resume token (e.g. received out of band).
    pub fn set_reconnect_token(&self, token: impl Into<String>) {
        let token = token.into();
        *lock(&self.shared.reconnect_token) = Some(token.clone());
        let storage = self.shared.storage.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { storage.save_reconnect_token(&token).await });
        }
    }

    /// Queue one command to the transport.
    fn send(&self, cmd: ClientCommand) -> Result<()> {
        let guard = lock(&self.shared.cmd_tx);
        match guard.as_ref() {
            Some(tx) => tx.send(cmd).map_err(|_| KaraokeError::NotConnected),
            None => Err(KaraokeError::NotConnected),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("allocated", &self.is_allocated())
            .field("epoch", &self.shared.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Drop is synchronous; aborting the task is the only safe teardown.
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

// ── Run task ────────────────────────────────────────────────────────

/// Why the pump loop for one transport ended.
enum PumpOutcome {
    /// Transport lost for a retryable reason; re-establish.
    Retry,
    /// Server closed the connection cleanly; terminal, no auto-retry.
    ServerClosed,
    /// Terminal application error; tear everything down and forget the token.
    Terminal,
    /// The manager handle is gone; exit quietly.
    Shutdown,
}

/// Background task owning the transport for one connection lifetime.
///
/// Loops over transport generations: establish (with bounded retry), bump
/// the epoch, attempt resume, pump until the transport drops or a terminal
/// condition ends the lifecycle.
async fn run(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    retry: RetryConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
) {
    debug!("connection task started");

    loop {
        let mut transport = match establish(&shared, &*connector, &retry).await {
            Some(t) => t,
            None => {
                // Budget exhausted: resume is abandoned, manual join required.
                clear_token(&shared).await;
                break;
            }
        };

        let epoch = shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        *lock(&shared.pending_stream) = Some(MessageStream { epoch, rx: msg_rx });
        set_status(&shared, ConnectionStatus::Connected);
        debug!(epoch, "transport connected");

        attempt_resume(&shared).await;

        match pump(&shared, transport.as_mut(), &mut cmd_rx, &msg_tx).await {
            PumpOutcome::Retry => {
                set_status(&shared, ConnectionStatus::Reconnecting);
                continue;
            }
            PumpOutcome::ServerClosed => {
                debug!("server closed the connection; not retrying");
                break;
            }
            PumpOutcome::Terminal => {
                let _ = transport.close().await;
                clear_token(&shared).await;
                break;
            }
            PumpOutcome::Shutdown => {
                let _ = transport.close().await;
                break;
            }
        }
    }

    *lock(&shared.cmd_tx) = None;
    *lock(&shared.pending_stream) = None;
    shared.resume_in_flight.store(false, Ordering::Release);
    set_status(&shared, ConnectionStatus::Disconnected);
    debug!("connection task exited");
}

/// Establish a transport within the retry budget. `None` when exhausted.
async fn establish(
    shared: &Shared,
    connector: &dyn Connector,
    retry: &RetryConfig,
) -> Option<Box<dyn Transport>> {
    let max_attempts = retry.max_attempts.max(1);
    let mut delay = retry.initial_delay;

    for attempt in 1..=max_attempts {
        match connector.connect().await {
            Ok(transport) => return Some(transport),
            Err(e) => {
                warn!(attempt, max_attempts, "connection attempt failed: {e}");
                set_status(shared, ConnectionStatus::Reconnecting);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(retry.max_delay);
                }
            }
        }
    }

    warn!("retry budget exhausted, giving up");
    None
}

/// Pump one transport generation: commands out, server messages in.
async fn pump(
    shared: &Shared,
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    msg_tx: &mpsc::UnboundedSender<ServerMessage>,
) -> PumpOutcome {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => {
                    debug!("sending command: {:?}", std::mem::discriminant(&cmd));
                    match serde_json::to_string(&cmd) {
                        Ok(json) => {
                            if let Err(e) = transport.send(json).await {
                                error!("transport send error: {e}");
                                return PumpOutcome::Retry;
                            }
                        }
                        Err(e) => {
                            // A command that cannot serialize is a programming
                            // bug; don't kill the connection over it.
                            error!("failed to serialize command: {e}");
                        }
                    }
                }
                None => {
                    debug!("command channel closed, shutting down");
                    return PumpOutcome::Shutdown;
                }
            },

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            let terminal = observe_inbound(shared, &msg).await;
                            // Forward 1:1 even when terminal, so the bridge
                            // can surface the error before the reset.
                            if msg_tx.send(msg).is_err() {
                                debug!("message stream dropped, discarding inbound message");
                            }
                            if terminal {
                                return PumpOutcome::Terminal;
                            }
                        }
                        Err(e) => {
                            // Unknown message kinds are a forward-compat no-op.
                            warn!("failed to deserialize server message: {e} — raw: {text}");
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("transport receive error: {e}");
                    return PumpOutcome::Retry;
                }
                None => return PumpOutcome::ServerClosed,
            }
        }
    }
}

/// Inspect an inbound message for token rotation and terminal conditions.
///
/// Returns `true` when the message carries a terminal error code.
async fn observe_inbound(shared: &Shared, msg: &ServerMessage) -> bool {
    match msg {
        ServerMessage::Welcome(payload) => {
            if shared.resume_in_flight.swap(false, Ordering::AcqRel) {
                debug!("resume confirmed by server");
            }
            if let Some(token) = &payload.reconnect_token {
                debug!("rotating resume token");
                *lock(&shared.reconnect_token) = Some(token.clone());
                shared.storage.save_reconnect_token(token).await;
            }
            shared.storage.save_session_id(&payload.session_id).await;
            false
        }
        ServerMessage::Error(payload) => {
            if payload.code.is_resume_failure() {
                debug!(code = ?payload.code, "resume failed, clearing token");
                shared.resume_in_flight.store(false, Ordering::Release);
                clear_token(shared).await;
            }
            if payload.code.is_terminal() {
                warn!(code = ?payload.code, "terminal error received, forcing disconnect");
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Attempt the application-level resume for the current connection.
///
/// No-op when another attempt is in flight or no token exists.
async fn attempt_resume(shared: &Shared) {
    if shared.resume_in_flight.swap(true, Ordering::AcqRel) {
        debug!("resume already in flight, skipping");
        return;
    }

    // Memory first, then the persisted copy.
    let token = lock(&shared.reconnect_token).clone();
    let token = match token {
        Some(t) => Some(t),
        None => shared.storage.load_reconnect_token().await,
    };

    let Some(token) = token else {
        debug!("no resume token, waiting for explicit join");
        shared.resume_in_flight.store(false, Ordering::Release);
        return;
    };

    debug!("attempting session resume");
    let sent = lock(&shared.cmd_tx)
        .as_ref()
        .is_some_and(|tx| tx.send(ClientCommand::Reconnect { reconnect_token: token }).is_ok());
    if !sent {
        warn!("could not queue reconnect command");
        shared.resume_in_flight.store(false, Ordering::Release);
    }
    // Otherwise stay passive: welcome or a resume-failure error clears the flag.
}

/// Forget the resume token in memory and storage.
async fn clear_token(shared: &Shared) {
    *lock(&shared.reconnect_token) = None;
    shared.storage.clear_reconnect_token().await;
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
    use crate::storage::MemoryTokenStore;
    use async_trait::async_trait;

    /// Connector that always fails, for exercising pre-connection behavior.
    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Err(KaraokeError::Io(std::io::Error::other("refused")))
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::with_retry(
            Arc::new(FailingConnector),
            Arc::new(MemoryTokenStore::new()),
            RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )
    }

    #[test]
    fn retry_config_defaults_mirror_policy() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn join_params_builder() {
        let params = JoinParams::new("Alice");
        assert!(params.session_id.is_none());
        let params = params.with_session_id("s1");
        assert_eq!(params.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn commands_fail_fast_when_not_allocated() {
        let manager = manager();
        assert!(matches!(
            manager.join(JoinParams::new("Alice")),
            Err(KaraokeError::NotConnected)
        ));
        assert!(matches!(
            manager.request_song("My Way"),
            Err(KaraokeError::NotConnected)
        ));
        assert!(matches!(manager.next_song(), Err(KaraokeError::NotConnected)));
        assert!(matches!(
            manager.reconnect("tok"),
            Err(KaraokeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn message_stream_fails_when_not_allocated() {
        let manager = manager();
        assert!(matches!(
            manager.message_stream(),
            Err(KaraokeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn status_listener_gets_current_status_immediately() {
        let manager = manager();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = manager.on_status_change(move |status| {
            seen_clone.lock().unwrap().push(status);
        });
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[ConnectionStatus::Disconnected]
        );
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn unsubscribed_listener_is_not_invoked() {
        let manager = manager();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = manager.on_status_change(move |status| {
            seen_clone.lock().unwrap().push(status);
        });
        sub.unsubscribe();

        manager.connect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the immediate invocation at registration time.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = manager();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.is_allocated());
    }

    #[tokio::test]
    async fn exhausted_retry_budget_ends_disconnected() {
        let manager = manager();
        manager.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.is_allocated());
    }

    #[tokio::test]
    async fn debug_impl() {
        let manager = manager();
        let s = format!("{manager:?}");
        assert!(s.contains("ConnectionManager"));
        assert!(s.contains("Disconnected"));
    }
}
