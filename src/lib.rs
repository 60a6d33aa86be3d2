//! # Karaoke Queue Client
//!
//! Transport-agnostic Rust client for a real-time karaoke queue service.
//!
//! The crate keeps a local mirror of the server-authoritative session state
//! (users, song queue, currently performing song) and keeps it fresh across
//! network interruptions. Three layers cooperate:
//!
//! - [`ConnectionManager`] — single owner of the connection: state machine,
//!   bounded retry with backoff, and the token-based resume protocol.
//! - [`EventDispatchBridge`] — translates connection events into actions
//!   and dispatches them into the store.
//! - [`SessionStore`] — a pure reducer over [`SessionState`]; observers
//!   watch it for changes.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement [`Transport`] and [`Connector`]
//!   for any bidirectional text channel
//! - **Wire-compatible** — all protocol types match the server's JSON
//!   schema exactly
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides `WebSocketTransport` and `WebSocketConnector`
//! - **Resumable** — a persisted reconnect token restores identity and
//!   session after restarts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use karaoke_queue_client::{
//!     ConnectionManager, EventDispatchBridge, JoinParams, MemoryTokenStore,
//!     WebSocketConnector,
//! };
//!
//! # async fn example() -> Result<(), karaoke_queue_client::KaraokeError> {
//! let manager = Arc::new(ConnectionManager::new(
//!     Arc::new(WebSocketConnector::new("wss://example.com/karaoke")),
//!     Arc::new(MemoryTokenStore::new()),
//! ));
//!
//! let bridge = EventDispatchBridge::new();
//! bridge.start(&manager);
//!
//! manager.connect();
//! manager.join(JoinParams::new("Alice"))?;
//!
//! let mut states = bridge.store().subscribe();
//! while states.changed().await.is_ok() {
//!     let state = states.borrow().clone();
//!     println!("queue length: {}", state.queue.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod connection;
pub mod error;
pub mod error_codes;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use bridge::EventDispatchBridge;
pub use connection::{ConnectionManager, JoinParams, MessageStream, RetryConfig, StatusSubscription};
pub use error::KaraokeError;
pub use error_codes::ErrorCode;
pub use protocol::{ClientCommand, ServerMessage};
pub use state::{ConnectionStatus, SessionAction, SessionState, SessionStore};
pub use storage::{MemoryTokenStore, ReconnectTokenStore, TokenStorage};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
