//! # Basic Session Example
//!
//! Demonstrates a complete karaoke queue client lifecycle:
//!
//! 1. Connect to a karaoke queue server via WebSocket
//! 2. Join (or create) a session
//! 3. Watch the session state evolve as songs are queued and performed
//! 4. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a karaoke queue server on localhost:4040, then:
//! cargo run --example basic_session
//!
//! # Override the server URL or nickname:
//! KARAOKE_URL=ws://my-server:4040/karaoke KARAOKE_NICKNAME=Alice \
//!     cargo run --example basic_session
//! ```

use std::sync::Arc;

use karaoke_queue_client::{
    ConnectionManager, ConnectionStatus, EventDispatchBridge, JoinParams, MemoryTokenStore,
    WebSocketConnector,
};

/// Default server URL when `KARAOKE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4040/karaoke";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("KARAOKE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let nickname = std::env::var("KARAOKE_NICKNAME").unwrap_or_else(|_| "rusty".to_string());
    tracing::info!("Connecting to {url} as {nickname}");

    // ── Wiring ──────────────────────────────────────────────────────
    // The manager owns the connection; the bridge mirrors everything the
    // server pushes into an observable session store.
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(WebSocketConnector::new(&url)),
        Arc::new(MemoryTokenStore::new()),
    ));
    let bridge = EventDispatchBridge::new();
    bridge.start(&manager);

    manager.connect();
    // Without a session id the server creates a new session with us as host.
    manager.join(JoinParams::new(nickname))?;

    // ── Observation loop ────────────────────────────────────────────
    let mut states = bridge.store().subscribe();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.connection_status == ConnectionStatus::Disconnected {
                    tracing::info!("Disconnected, exiting");
                    break;
                }
                tracing::info!(
                    status = ?state.connection_status,
                    session = state.session.as_ref().map(|s| s.name.as_str()),
                    queue = state.queue.len(),
                    now_playing = state.current_song.as_ref().map(|item| item.title.as_str()),
                    "session update"
                );
                if let Some(notification) = &state.prepare_notification {
                    tracing::info!(
                        title = %notification.item.title,
                        seconds = notification.seconds_until_turn,
                        "get ready to sing!"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, disconnecting");
                manager.disconnect();
                break;
            }
        }
    }

    Ok(())
}
