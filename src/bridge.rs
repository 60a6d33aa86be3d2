//! Glue between the connection layer and the session store.
//!
//! [`EventDispatchBridge`] subscribes to a
//! [`ConnectionManager`](crate::connection::ConnectionManager), translates
//! every status change and inbound server message into a
//! [`SessionAction`](crate::state::SessionAction), and dispatches it into a
//! [`SessionStore`](crate::state::SessionStore). It owns no protocol logic
//! of its own; the translation is the 1:1 `From<ServerMessage>` impl.
//!
//! Each transition into [`Connected`](ConnectionStatus::Connected) attaches
//! the new epoch's message stream and detaches the previous one first, so a
//! stale stream can never dispatch into the store alongside the live one.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{ConnectionManager, StatusSubscription};
use crate::state::{ConnectionStatus, SessionAction, SessionStore};

/// Lock a std mutex, recovering from poisoning.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Installed {
    _subscription: StatusSubscription,
    supervisor: JoinHandle<()>,
    pump: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

/// Dispatches connection events into a [`SessionStore`].
///
/// Create one per store, [`start`](EventDispatchBridge::start) it against a
/// manager, and keep it alive for as long as events should flow. Dropping
/// the bridge (or calling [`stop`](EventDispatchBridge::stop)) detaches
/// everything; the store keeps its last state.
pub struct EventDispatchBridge {
    store: Arc<SessionStore>,
    installed: StdMutex<Option<Installed>>,
}

impl EventDispatchBridge {
    /// Create a bridge with a fresh, empty store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(SessionStore::new()))
    }

    /// Create a bridge dispatching into an existing store.
    pub fn with_store(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            installed: StdMutex::new(None),
        }
    }

    /// The store this bridge dispatches into.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Attach to a manager.
    ///
    /// Any previous attachment is detached first, so repeated calls never
    /// duplicate dispatches. The store immediately receives the manager's
    /// current status; if that status is already
    /// [`Connected`](ConnectionStatus::Connected), the current epoch's
    /// message stream is attached as well.
    pub fn start(&self, manager: &Arc<ConnectionManager>) {
        let mut installed = lock(&self.installed);
        if let Some(previous) = installed.take() {
            detach(previous);
        }

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        // The subscription's immediate invocation seeds the channel with the
        // current status before any change.
        let subscription = manager.on_status_change(move |status| {
            let _ = status_tx.send(status);
        });

        let pump: Arc<StdMutex<Option<JoinHandle<()>>>> = Arc::new(StdMutex::new(None));
        let store = Arc::clone(&self.store);
        let manager = Arc::clone(manager);
        let pump_slot = Arc::clone(&pump);

        let supervisor = tokio::spawn(async move {
            // Epoch of the stream the current pump task consumes, if any.
            let mut attached_epoch: Option<u64> = None;

            while let Some(status) = status_rx.recv().await {
                store.dispatch(SessionAction::ConnectionStatusChanged(status));

                match status {
                    ConnectionStatus::Connected => {
                        match manager.message_stream() {
                            Ok(mut stream) => {
                                // Detach the superseded epoch before
                                // attaching the new one.
                                if let Some(handle) = lock(&pump_slot).take() {
                                    handle.abort();
                                }
                                debug!(epoch = stream.epoch(), "attaching message stream");
                                attached_epoch = Some(stream.epoch());
                                let store = Arc::clone(&store);
                                let handle = tokio::spawn(async move {
                                    while let Some(msg) = stream.recv().await {
                                        store.dispatch(SessionAction::from(msg));
                                    }
                                    debug!("message stream ended");
                                });
                                *lock(&pump_slot) = Some(handle);
                            }
                            // The stream for an epoch is handed out once. A
                            // burst of queued status changes can make a stale
                            // CONNECTED claim the latest epoch's stream ahead
                            // of the CONNECTED that announced it; the epoch
                            // comparison tells that apart from a genuinely
                            // missing stream.
                            Err(_) if attached_epoch == Some(manager.current_epoch()) => {
                                debug!("current epoch's stream already attached");
                            }
                            Err(_) => {
                                debug!("no message stream available this cycle, skipping");
                            }
                        }
                    }
                    ConnectionStatus::Disconnected => {
                        if let Some(handle) = lock(&pump_slot).take() {
                            handle.abort();
                        }
                        attached_epoch = None;
                    }
                    // Transport loss ends the attached stream organically
                    // (its sender drops with the dead transport's pump), so
                    // no detach here — aborting on a stale RECONNECTING
                    // could kill the pump a newer CONNECTED just attached.
                    ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {}
                }
            }
        });

        *installed = Some(Installed {
            _subscription: subscription,
            supervisor,
            pump,
        });
    }

    /// Detach from the manager. Idempotent; the store keeps its last state.
    pub fn stop(&self) {
        if let Some(installed) = lock(&self.installed).take() {
            detach(installed);
        }
    }
}

fn detach(installed: Installed) {
    installed.supervisor.abort();
    if let Some(handle) = lock(&installed.pump).take() {
        handle.abort();
    }
    // The subscription guard drops here, unregistering the status listener.
}

impl Default for EventDispatchBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventDispatchBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventDispatchBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatchBridge")
            .field("attached", &lock(&self.installed).is_some())
            .finish()
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
    use crate::error::{KaraokeError, Result};
    use crate::storage::MemoryTokenStore;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Err(KaraokeError::Io(std::io::Error::other("refused")))
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            Arc::new(FailingConnector),
            Arc::new(MemoryTokenStore::new()),
        ))
    }

    #[tokio::test]
    async fn initial_status_reaches_the_store() {
        let manager = manager();
        let bridge = EventDispatchBridge::new();
        bridge.start(&manager);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            bridge.store().state().connection_status,
            ConnectionStatus::Disconnected
        );
        bridge.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let manager = manager();
        let bridge = EventDispatchBridge::new();
        bridge.start(&manager);
        bridge.stop();
        bridge.stop();
    }

    #[tokio::test]
    async fn restart_replaces_previous_attachment() {
        let manager = manager();
        let bridge = EventDispatchBridge::new();
        bridge.start(&manager);
        bridge.start(&manager);

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Exactly one live attachment remains.
        assert!(format!("{bridge:?}").contains("attached: true"));
        bridge.stop();
    }
}
