//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Keepalive is handled here rather than in STOMP: while `receive` is being
//! polled the transport sends a WebSocket Ping every ping interval, and if the
//! previous Ping is still unanswered when the next one is due the connection
//! is considered dead.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{
    Connector as TlsConnector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
};
use tracing::{debug, info, trace, warn};

use crate::transport::{Connector, OpenRequest, Transport, TransportError};

/// Opens [`WsTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self, request: OpenRequest) -> Result<WsTransport, TransportError> {
        info!(url = %request.url, "opening websocket");

        let mut handshake = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            handshake.headers_mut().insert(header_name, header_value);
        }

        let connector = request.tls.map(TlsConnector::Rustls);
        let (stream, response) =
            connect_async_tls_with_config(handshake, None, false, connector).await?;
        debug!(status = %response.status(), "websocket handshake complete");

        Ok(WsTransport::from_stream(stream, request.ping_interval))
    }
}

/// A WebSocket carrying one STOMP frame per message.
pub struct WsTransport<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
    ping: Option<Interval>,
    ping_interval: Duration,
    awaiting_pong: bool,
    open: bool,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established WebSocket. A zero or absent interval disables
    /// keepalive pings.
    pub fn from_stream(stream: WebSocketStream<S>, ping_interval: Option<Duration>) -> Self {
        let ping_interval = ping_interval.unwrap_or(Duration::ZERO);
        let ping = (!ping_interval.is_zero()).then(|| {
            let mut tick = interval_at(Instant::now() + ping_interval, ping_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });
        Self {
            stream,
            ping,
            ping_interval,
            awaiting_pong: false,
            open: true,
        }
    }

    fn lost(&mut self, err: WsError) -> TransportError {
        self.open = false;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Closed("websocket closed".to_string())
            }
            other => TransportError::WebSocket(other),
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(tick) => {
            tick.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed("websocket closed".to_string()));
        }
        match self.stream.send(Message::Binary(payload)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.lost(e)),
        }
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        loop {
            tokio::select! {
                incoming = self.stream.next() => match incoming {
                    Some(Ok(Message::Binary(payload))) => return Ok(payload),
                    Some(Ok(Message::Text(text))) => return Ok(Bytes::copy_from_slice(text.as_str().as_bytes())),
                    Some(Ok(Message::Pong(_))) => {
                        trace!("pong");
                        self.awaiting_pong = false;
                    }
                    // tungstenite answers pings itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(close))) => {
                        self.open = false;
                        let reason = match close {
                            Some(c) => format!("close code {} {}", u16::from(c.code), c.reason.as_str()),
                            None => "peer closed".to_string(),
                        };
                        debug!(reason = %reason, "websocket closed by peer");
                        return Err(TransportError::Closed(reason));
                    }
                    Some(Err(e)) => return Err(self.lost(e)),
                    None => {
                        self.open = false;
                        return Err(TransportError::Closed("stream ended".to_string()));
                    }
                },
                _ = next_ping(&mut self.ping) => {
                    if self.awaiting_pong {
                        warn!(interval = ?self.ping_interval, "websocket peer did not answer ping");
                        self.open = false;
                        return Err(TransportError::PingTimeout(self.ping_interval));
                    }
                    trace!("ping");
                    if let Err(e) = self.stream.send(Message::Ping(Bytes::new())).await {
                        return Err(self.lost(e));
                    }
                    self.awaiting_pong = true;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::WebSocket(e)),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
