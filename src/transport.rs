//! Connection seams of the realtime manager.
//!
//! A [`Transport`] carries whole JSON frames in both directions. A
//! [`Connector`] opens one, and the
//! [`RealtimeManager`](crate::realtime::RealtimeManager) asks it for a brand
//! new transport on the first subscribe and again on every reconnect. The
//! default implementation is
//! [`WebSocketConnector`](crate::transports::WebSocketConnector); tests and
//! demos plug in in-process channels.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tiergate::error::TierGateError;
//! use tiergate::transport::{Connector, Transport};
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     outbound: mpsc::UnboundedSender<String>,
//!     inbound: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), TierGateError> {
//!         self.outbound
//!             .send(message)
//!             .map_err(|e| TierGateError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, TierGateError>> {
//!         self.inbound.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), TierGateError> {
//!         Ok(())
//!     }
//! }
//!
//! struct ChannelConnector;
//!
//! #[async_trait]
//! impl Connector for ChannelConnector {
//!     type Transport = ChannelTransport;
//!
//!     async fn connect(&self) -> Result<ChannelTransport, TierGateError> {
//!         let (outbound, _server_rx) = mpsc::unbounded_channel();
//!         let (_server_tx, inbound) = mpsc::unbounded_channel();
//!         Ok(ChannelTransport { outbound, inbound })
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::TierGateError;

/// One open connection to the realtime server, carrying JSON text frames.
///
/// `recv` is polled inside `tokio::select!` next to heartbeat ticks and the
/// shutdown signal, so it must be cancel-safe: a dropped `recv` future may not
/// swallow a frame.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one frame.
    ///
    /// # Errors
    ///
    /// [`TierGateError::TransportSend`] when the write fails, or
    /// [`TierGateError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), TierGateError>;

    /// Next frame from the server.
    ///
    /// - `Some(Ok(text))` — one frame
    /// - `Some(Err(e))` — the connection failed
    /// - `None` — the server closed the connection
    async fn recv(&mut self) -> Option<Result<String, TierGateError>>;

    /// Close the connection. Calling it twice must be harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are released
    /// either way.
    async fn close(&mut self) -> Result<(), TierGateError>;
}

/// Opens fresh [`Transport`]s to the realtime server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// The manager reports any error as `CHANNEL_ERROR` and retries it with
    /// backoff.
    async fn connect(&self) -> Result<Self::Transport, TierGateError>;
}
