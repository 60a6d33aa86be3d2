//! Transport abstraction for the karaoke queue protocol.
//!
//! The protocol is JSON text messages over any bidirectional channel. Two
//! traits cover the seam:
//!
//! - [`Transport`] — one live connection: send/recv/close. Framing is the
//!   implementation's concern (WebSocket frames, length-prefixed TCP, ...).
//! - [`Connector`] — a factory that can establish a fresh [`Transport`].
//!   The [`ConnectionManager`](crate::connection::ConnectionManager) calls
//!   it again during automatic retry, so reconnection works with any
//!   backend without the manager knowing connection parameters (URLs,
//!   host:port pairs, QUIC endpoints).
//!
//! # Implementing a custom transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use karaoke_queue_client::error::KaraokeError;
//! use karaoke_queue_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), KaraokeError> {
//!         // Send one complete JSON text message
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, KaraokeError>> {
//!         // Receive the next JSON text message;
//!         // None when the server closed the connection cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), KaraokeError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::KaraokeError;

/// A bidirectional text message transport for the karaoke queue protocol.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON
/// message; each call to [`recv`](Transport::recv) returns one.
///
/// # Object safety
///
/// This trait is object-safe; the connection manager holds transports as
/// `Box<dyn Transport>` so they can be replaced across reconnects.
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it runs inside
/// `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-backed implementations are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::TransportSend`] if the message could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), KaraokeError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, KaraokeError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources when the close handshake fails.
    async fn close(&mut self) -> Result<(), KaraokeError>;
}

/// Factory for establishing transports.
///
/// Owns whatever connection parameters its backend needs. Called once for
/// the initial connection and again for every automatic retry attempt; each
/// successful call yields a brand-new connection (a new "epoch" — stale
/// handles from prior epochs never deliver into the new one).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection.
    ///
    /// # Errors
    ///
    /// Returns any [`KaraokeError`] on failure; the connection manager
    /// treats every failure as retryable until the retry budget is
    /// exhausted.
    async fn connect(&self) -> Result<Box<dyn Transport>, KaraokeError>;
}
