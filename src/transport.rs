//! The message channel a [`Session`](crate::Session) runs on.
//!
//! A transport carries one encoded STOMP frame per message. The session only
//! needs the small contract below; [`WsConnector`](crate::WsConnector)
//! provides the WebSocket implementation and tests substitute in-memory ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket handshake or protocol failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// A handshake header name or value could not be put on the wire
    #[error("invalid handshake header '{0}'")]
    InvalidHeader(String),
    /// The peer closed the connection or the stream ended
    #[error("connection closed: {0}")]
    Closed(String),
    /// The peer stopped answering keepalive pings
    #[error("no pong received within {0:?}")]
    PingTimeout(Duration),
}

/// Everything needed to open a transport.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Endpoint to connect to
    pub url: Url,
    /// Extra handshake headers, e.g. `Authorization`
    pub headers: Vec<(String, String)>,
    /// TLS context used for `wss://` endpoints
    pub tls: Option<Arc<rustls::ClientConfig>>,
    /// Keepalive ping interval; `None` disables pings
    pub ping_interval: Option<Duration>,
}

/// A full-duplex message channel carrying encoded frames.
///
/// `receive` must be cancel-safe: the session races it against outbound
/// writes and drops the pending future when a write wins.
pub trait Transport: Send + 'static {
    /// Send one message.
    fn send(&mut self, payload: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next complete message.
    fn receive(&mut self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    /// Close the channel.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// False once the channel has been closed; the session neither writes
    /// to nor closes a transport that reports this.
    fn is_open(&self) -> bool;
}

/// Opens transports.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn open(
        &self,
        request: OpenRequest,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
