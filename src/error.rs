//! Error types for the karaoke queue client.

use thiserror::Error;

/// Errors that can occur when using the karaoke queue client.
#[derive(Debug, Error)]
pub enum KaraokeError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an allocated transport, but none exists.
    ///
    /// Commands are never silently dropped; callers that emit commands before
    /// [`connect()`](crate::connection::ConnectionManager::connect) (or after
    /// [`disconnect()`](crate::connection::ConnectionManager::disconnect)) get
    /// this error so sequencing bugs surface during development.
    #[error("not connected to server")]
    NotConnected,

    /// A persistence operation against the
    /// [`ReconnectTokenStore`](crate::storage::ReconnectTokenStore) failed.
    ///
    /// Never reaches command callers — token storage failures are caught,
    /// logged, and treated as "no token available".
    #[error("token storage error: {0}")]
    Storage(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for karaoke queue client operations.
pub type Result<T> = std::result::Result<T, KaraokeError>;
