//! WebSocket transport and connector using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries realtime frames as WebSocket text messages.
//! [`WebSocketConnector`] opens a fresh transport for every channel attempt of
//! a [`RealtimeManager`](crate::realtime::RealtimeManager).
//!
//! `wss://` URLs need one of `tokio-tungstenite`'s TLS features enabled in the
//! final binary.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), tiergate::TierGateError> {
//! use tiergate::protocol::Frame;
//! use tiergate::{Connector, Transport, WebSocketConnector};
//!
//! let connector = WebSocketConnector::supabase("https://abc.supabase.co", "anon-key");
//! let mut transport = connector.connect().await?;
//! transport.send(Frame::heartbeat("1").encode()?).await?;
//! let reply = transport.recv().await;
//! transport.close().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::TierGateError;
use crate::transport::{Connector, Transport};

/// Protocol version requested from the realtime server.
pub const REALTIME_VSN: &str = "1.0.0";

/// Client stream produced by `connect_async`; accepted by
/// [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Realtime frames over one WebSocket connection.
///
/// Text messages are frames; pings are answered by tungstenite and binary
/// messages are dropped.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// [`TierGateError::Io`] for a bad URL or a failed handshake. Socket
    /// errors keep their [`ErrorKind`](std::io::ErrorKind).
    pub async fn connect(url: &str) -> Result<Self, TierGateError> {
        tracing::debug!(url = %redact(url), "connecting to realtime server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            TierGateError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %redact(url), "realtime WebSocket established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// [`connect`](Self::connect) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::Timeout`] if the deadline elapses, or any
    /// error [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, TierGateError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| TierGateError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), TierGateError> {
        if self.closed {
            return Err(TierGateError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| TierGateError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TierGateError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(TierGateError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TierGateError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| TierGateError::TransportSend(e.to_string()))
    }
}

// ── Connector ───────────────────────────────────────────────────────

/// Opens a [`WebSocketTransport`] to a fixed URL for each channel attempt.
///
/// ```
/// use tiergate::WebSocketConnector;
///
/// let connector = WebSocketConnector::supabase("https://abc.supabase.co", "anon-key");
/// assert_eq!(
///     connector.url(),
///     "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
/// );
/// ```
#[derive(Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: None,
        }
    }

    /// Realtime endpoint of a Supabase project given its HTTP(S) URL.
    pub fn supabase(project_url: &str, api_key: &str) -> Self {
        let base = project_url.trim_end_matches('/');
        let base = if let Some(host) = base.strip_prefix("https://") {
            format!("wss://{host}")
        } else if let Some(host) = base.strip_prefix("http://") {
            format!("ws://{host}")
        } else {
            base.to_string()
        };
        Self::new(format!(
            "{base}/realtime/v1/websocket?apikey={api_key}&vsn={REALTIME_VSN}"
        ))
    }

    /// Bound each connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &redact(&self.url))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self) -> Result<WebSocketTransport, TierGateError> {
        match self.connect_timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(&self.url, timeout).await,
            None => WebSocketTransport::connect(&self.url).await,
        }
    }
}

/// Drop the query string so API keys stay out of logs.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

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
    use crate::protocol::{Frame, Incoming, ReplyStatus, PHOENIX_TOPIC};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    /// Accept one WebSocket connection, report its request URI and hand the
    /// stream to `handler`.
    async fn realtime_server<F, Fut>(handler: F) -> (String, oneshot::Receiver<String>)
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uri_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            })
            .await
            .unwrap();
            handler(ws).await;
        });

        (format!("http://{addr}"), uri_rx)
    }

    /// Answer every heartbeat with an ok reply until the client goes away.
    async fn answer_heartbeats(mut ws: ServerStream) {
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame = Frame::decode(&text).unwrap();
            if frame.event == "heartbeat" {
                let reply = serde_json::json!({
                    "topic": PHOENIX_TOPIC,
                    "event": "phx_reply",
                    "payload": {"status": "ok", "response": {}},
                    "ref": frame.msg_ref,
                });
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        }
    }

    #[test]
    fn supabase_url_maps_scheme() {
        let connector = WebSocketConnector::supabase("http://localhost:54321/", "key");
        assert_eq!(
            connector.url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
    }

    #[test]
    fn debug_hides_api_key() {
        let connector = WebSocketConnector::supabase("https://abc.supabase.co", "secret");
        let debug = format!("{connector:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("wss://abc.supabase.co/realtime/v1/websocket"));
    }

    #[tokio::test]
    async fn supabase_connector_requests_realtime_endpoint() {
        let (base, uri) = realtime_server(answer_heartbeats).await;
        let connector = WebSocketConnector::supabase(&base, "anon");

        let mut transport = connector.connect().await.unwrap();
        assert_eq!(
            uri.await.unwrap(),
            "/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_is_answered_over_the_socket() {
        let (base, _uri) = realtime_server(answer_heartbeats).await;
        let mut transport = WebSocketConnector::supabase(&base, "anon")
            .connect()
            .await
            .unwrap();

        transport
            .send(Frame::heartbeat("1").encode().unwrap())
            .await
            .unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        let incoming = Frame::decode(&text).unwrap().classify().unwrap();
        assert_eq!(
            incoming,
            Incoming::Reply {
                msg_ref: Some("1".into()),
                status: ReplyStatus::Ok,
                response: serde_json::json!({}),
            }
        );
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_frame_ends_the_stream() {
        let (base, _uri) = realtime_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;
        let mut transport = WebSocketConnector::supabase(&base, "anon")
            .connect()
            .await
            .unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let (base, _uri) = realtime_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0x83, 0x01].into())).await.unwrap();
            ws.send(Message::Text(r#"{"topic":"phoenix","event":"phx_reply"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;
        let mut transport = WebSocketConnector::supabase(&base, "anon")
            .connect()
            .await
            .unwrap();

        let text = transport.recv().await.unwrap().unwrap();
        assert_eq!(Frame::decode(&text).unwrap().event, "phx_reply");
    }

    #[tokio::test]
    async fn send_after_close_is_rejected_and_close_is_idempotent() {
        let (base, _uri) = realtime_server(answer_heartbeats).await;
        let mut transport = WebSocketConnector::supabase(&base, "anon")
            .connect()
            .await
            .unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport
            .send(Frame::heartbeat("2").encode().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TierGateError::TransportClosed));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_io_error() {
        let err = WebSocketConnector::new("ws://127.0.0.1:1")
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, TierGateError::Io(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn connect_timeout_is_enforced() {
        // TEST-NET-1 is not routable.
        let err = WebSocketConnector::new("ws://192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50))
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, TierGateError::Timeout));
    }
}
