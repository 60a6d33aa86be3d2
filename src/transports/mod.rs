//! Concrete transports for the karaoke queue protocol.
//!
//! Implementations live behind feature gates; enable the matching Cargo
//! feature to pull one in:
//!
//! | Feature                | Types                                          |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), karaoke_queue_client::KaraokeError> {
//! use karaoke_queue_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:4040/karaoke").await?;
//! ws.send(r#"{"type":"nextSong"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
