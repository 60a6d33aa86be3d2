//! WebSocket transport built on `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the karaoke queue protocol's JSON text
//! messages over a WebSocket connection; [`WebSocketConnector`] lets the
//! [`ConnectionManager`](crate::connection::ConnectionManager) re-establish
//! that connection during automatic retry. Both `ws://` and `wss://` URLs
//! work — TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), karaoke_queue_client::KaraokeError> {
//! use karaoke_queue_client::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://localhost:4040/karaoke").await?;
//! transport.send(r#"{"type":"nextSong"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::KaraokeError;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
///
/// Public so callers can build a [`WebSocketTransport`] from an existing
/// stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// Translates between the protocol's one-JSON-message-per-frame convention
/// and WebSocket text frames. Control frames (ping/pong/close) are handled
/// internally and never surface to callers.
///
/// # Construction
///
/// Use [`WebSocketTransport::connect`] for the common case. For custom TLS,
/// proxies, or extra headers, build the stream yourself and wrap it with
/// [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before
/// completion loses no messages, so it is safe inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// Supports `ws://` and `wss://` schemes; TLS is negotiated
    /// automatically by `tokio-tungstenite`.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors map
    /// to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, KaraokeError> {
        tracing::debug!(url = %url, "connecting to karaoke server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            KaraokeError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful when [`connect`](Self::connect) does not expose the connection
    /// setup you need (custom TLS configuration, proxy headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new WebSocket connection with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`KaraokeError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, KaraokeError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| KaraokeError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), KaraokeError> {
        if self.closed {
            return Err(KaraokeError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| KaraokeError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, KaraokeError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(KaraokeError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                // `Utf8Bytes::to_string()` copies the payload; `Utf8Bytes`
                // does not expose the inner buffer by value.
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) => {
                    // tungstenite auto-queues a Pong reply.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; arm kept for
                    // exhaustiveness.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), KaraokeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| KaraokeError::TransportSend(e.to_string()))
    }
}

/// A [`Connector`] that dials a fixed WebSocket URL.
///
/// Hand one to the [`ConnectionManager`](crate::connection::ConnectionManager)
/// and reconnection works without the manager ever seeing the URL.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use karaoke_queue_client::{ConnectionManager, MemoryTokenStore, WebSocketConnector};
///
/// let manager = ConnectionManager::new(
///     Arc::new(WebSocketConnector::new("ws://localhost:4040/karaoke")),
///     Arc::new(MemoryTokenStore::new()),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Option<std::time::Duration>,
}

impl WebSocketConnector {
    /// Create a connector for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: None,
        }
    }

    /// Bound each connection attempt with a timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The URL this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, KaraokeError> {
        let transport = match self.connect_timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(&self.url, timeout).await?,
            None => WebSocketTransport::connect(&self.url).await?,
        };
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, KaraokeError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        let err = result.unwrap_err();
        assert!(matches!(err, KaraokeError::Io(_)));
    }

    // ── Mock-server helpers ──────────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    // ── Mock-server tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_receives_text_messages() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("first".into())).await.unwrap();
            ws.send(Message::Text("second".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "first");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "second");
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        // The binary frame is silently skipped.
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, KaraokeError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address to guarantee a timeout.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            std::time::Duration::from_millis(50),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, KaraokeError::Timeout));
    }

    #[tokio::test]
    async fn from_stream_constructor_works() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("from_stream_msg".into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(ws_stream);

        assert_eq!(transport.recv().await.unwrap().unwrap(), "from_stream_msg");
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.send("echo_me".to_string()).await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "echo_me");
    }

    #[tokio::test]
    async fn connector_yields_working_transport() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("via_connector".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new(&url);
        assert_eq!(connector.url(), url);

        let mut transport = connector.connect().await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "via_connector");
    }

    #[tokio::test]
    async fn connector_with_timeout_fails_on_unreachable_host() {
        let connector = WebSocketConnector::new("ws://192.0.2.1:1")
            .with_connect_timeout(std::time::Duration::from_millis(50));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, KaraokeError::Timeout));
    }
}
