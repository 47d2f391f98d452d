use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{FrameError, StompCodec, StompItem, decode_item};
use crate::config::{ErrorPolicy, SessionConfig};
use crate::frame::{
    CONNECT, CONNECTED, DISCONNECT, ERROR, Frame, MESSAGE, RECEIPT, SEND, SUBSCRIBE, ServerError,
    UNSUBSCRIBE,
};
use crate::observer::SessionObserver;
use crate::transport::{Connector, OpenRequest, Transport, TransportError};
use crate::websocket::WsConnector;

/// Protocol version offered in CONNECT.
pub const STOMP_VERSION: &str = "1.2";

/// Lifecycle of a [`Session`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Session`] operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// An outbound frame could not be encoded, or an inbound one decoded
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The transport could not be opened
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The transport failed or closed while the session was in use
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The operation is not permitted in the current state
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// The broker sent an ERROR frame under [`ErrorPolicy::Fail`]
    #[error(transparent)]
    Server(#[from] ServerError),
    /// `unsubscribe` was called for a topic that has no subscription
    #[error("no subscription for topic '{0}'")]
    UnknownSubscription(String),
    /// The session's cancellation token fired
    #[error("session cancelled")]
    Cancelled,
}

enum Command {
    Write {
        payload: Bytes,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    WatchReceipt {
        id: String,
        notify: oneshot::Sender<()>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

type Delivery = Result<Bytes, SessionError>;

/// Channels to a running driver task.
struct Link {
    commands: mpsc::Sender<Command>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    driver: JoinHandle<()>,
}

/// A STOMP session over one exclusively owned transport.
///
/// `connect` opens the transport and hands it to a background driver task.
/// The driver is the only reader of the transport: it filters inbound frames
/// down to MESSAGE bodies, which [`read_message`](Self::read_message) returns
/// in arrival order. Writes are queued to the same task, so frames never
/// interleave on the wire.
///
/// A session is single use. Once it is `Closed`, build a new one.
pub struct Session<C: Connector = WsConnector> {
    config: SessionConfig,
    connector: C,
    state: SessionState,
    cancel: CancellationToken,
    link: Option<Link>,
    version: watch::Receiver<Option<String>>,
    subscriptions: HashMap<String, String>,
    next_subscription: u64,
}

impl Session<WsConnector> {
    /// Create an idle session that will connect over WebSocket.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> Session<C> {
    /// Create an idle session that opens its transport through `connector`.
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        let cancel = match config.parent_token() {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let (_, version) = watch::channel(None);
        Self {
            config,
            connector,
            state: SessionState::Idle,
            cancel,
            link: None,
            version,
            subscriptions: HashMap::new(),
            next_subscription: 0,
        }
    }

    /// Current state. A cancelled session reports `Closed`, and so does an
    /// open one whose receive loop has ended; the next operation on it
    /// returns the reason.
    pub fn state(&self) -> SessionState {
        let state = self.lifecycle();
        let ended = self
            .link
            .as_ref()
            .is_some_and(|link| link.driver.is_finished());
        if state == SessionState::Open && ended {
            SessionState::Closed
        } else {
            state
        }
    }

    fn lifecycle(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    /// The `version` header of the broker's CONNECTED frame, once the
    /// receive loop has seen it.
    pub fn negotiated_version(&self) -> Option<String> {
        self.version.borrow().clone()
    }

    /// The subscription id allocated for `topic`, if subscribed.
    pub fn subscription_id(&self, topic: &str) -> Option<&str> {
        self.subscriptions.get(topic).map(String::as_str)
    }

    /// Token that ends the session when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the transport and send CONNECT.
    ///
    /// The transport is opened with an `Authorization: Basic` header built
    /// from the configured credentials. This does not wait for CONNECTED;
    /// the reply is consumed by the receive loop.
    ///
    /// If the transport cannot be opened the session stays `Connecting` and
    /// cannot be used again.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let state = self.lifecycle();
        if state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state,
            });
        }
        self.state = SessionState::Connecting;

        let request = OpenRequest {
            url: self.config.url().clone(),
            headers: vec![(
                "Authorization".to_string(),
                self.config.credentials().basic_authorization(),
            )],
            tls: self.config.tls().cloned(),
            ping_interval: self.config.ping_interval(),
        };
        let transport = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = self.connector.open(request) => opened?,
        };

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let (version_tx, version_rx) = watch::channel(None);
        let driver = Driver {
            transport,
            commands: commands_rx,
            deliveries: deliveries_tx,
            version: version_tx,
            receipts: HashMap::new(),
            policy: self.config.error_policy(),
            observer: self.config.observer().clone(),
            cancel: self.cancel.clone(),
        };
        self.version = version_rx;
        self.link = Some(Link {
            commands: commands_tx,
            deliveries: deliveries_rx,
            driver: tokio::spawn(driver.run()),
        });

        let frame = Frame::new(CONNECT)
            .header("accept-version", STOMP_VERSION)
            .header("host", self.config.host());
        debug!(host = %self.config.host(), "sending CONNECT");
        self.transmit(frame).await?;
        self.state = SessionState::Open;
        Ok(())
    }

    /// Subscribe to `topic` and return its subscription id.
    ///
    /// Each topic gets its own id (`sub-0`, `sub-1`, ...). Subscribing to a
    /// topic that is already subscribed returns the existing id and sends
    /// nothing.
    pub async fn subscribe(&mut self, topic: &str) -> Result<String, SessionError> {
        self.ensure_open("subscribe")?;
        if let Some(id) = self.subscriptions.get(topic) {
            return Ok(id.clone());
        }

        let id = format!("sub-{}", self.next_subscription);
        let frame = Frame::new(SUBSCRIBE)
            .header("destination", topic)
            .header("id", &id);
        debug!(destination = topic, id = %id, "sending SUBSCRIBE");
        self.transmit(frame).await?;

        self.next_subscription += 1;
        self.subscriptions.insert(topic.to_string(), id.clone());
        Ok(id)
    }

    /// Drop the subscription for `topic`.
    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        self.ensure_open("unsubscribe")?;
        let id = self
            .subscriptions
            .get(topic)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSubscription(topic.to_string()))?;

        debug!(destination = topic, id = %id, "sending UNSUBSCRIBE");
        self.transmit(Frame::new(UNSUBSCRIBE).header("id", &id)).await?;
        self.subscriptions.remove(topic);
        Ok(())
    }

    /// Publish `message` to `topic`.
    pub async fn send(
        &mut self,
        topic: &str,
        message: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        self.ensure_open("send")?;
        let body = message.into();
        let frame = Frame::new(SEND)
            .header("destination", topic)
            .header("content-length", body.len().to_string())
            .set_body(body);
        debug!(destination = topic, bytes = frame.body.len(), "sending SEND");
        self.transmit(frame).await
    }

    /// Wait for the next MESSAGE body.
    ///
    /// CONNECTED, RECEIPT, heart-beats and unknown frames are consumed
    /// without returning. ERROR frames are logged, or end the session with
    /// [`SessionError::Server`] under [`ErrorPolicy::Fail`].
    ///
    /// # Returns
    /// The body of the next MESSAGE frame, in broker order. A failed
    /// transport yields `ConnectionLost`, a malformed frame yields `Frame`,
    /// and cancellation yields `Cancelled`; each of these closes the session.
    pub async fn read_message(&mut self) -> Result<Bytes, SessionError> {
        self.ensure_open("read_message")?;
        let Some(link) = self.link.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "read_message",
                state: self.state,
            });
        };

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            delivery = link.deliveries.recv() => match delivery {
                Some(delivery) => delivery,
                None => Err(SessionError::ConnectionLost("receive loop ended".to_string())),
            },
        };
        if next.is_err() {
            self.state = SessionState::Closed;
        }
        next
    }

    /// Send DISCONNECT and close the transport.
    ///
    /// With a receipt id the DISCONNECT requests a receipt and this waits up
    /// to the configured receipt timeout for it. A receipt that never comes
    /// is logged; the session is closed either way.
    pub async fn disconnect(&mut self, receipt: Option<&str>) -> Result<(), SessionError> {
        self.ensure_open("disconnect")?;
        self.state = SessionState::Closing;

        let mut frame = Frame::new(DISCONNECT);
        let mut waiter = None;
        if let Some(id) = receipt {
            frame = frame.receipt(id);
            waiter = self.watch_receipt(id).await;
        }
        debug!(receipt = ?receipt, "sending DISCONNECT");
        let sent = self.transmit(frame).await;

        if let (Ok(()), Some(waiter), Some(id)) = (&sent, waiter, receipt) {
            match tokio::time::timeout(self.config.receipt_timeout(), waiter).await {
                Ok(Ok(())) => debug!(receipt = id, "disconnect acknowledged"),
                Ok(Err(_)) => warn!(receipt = id, "connection ended before disconnect receipt"),
                Err(_) => warn!(
                    receipt = id,
                    timeout = ?self.config.receipt_timeout(),
                    "no receipt for DISCONNECT"
                ),
            }
        }

        self.shutdown().await;
        self.state = SessionState::Closed;
        sent
    }

    /// Operations still run once the receive loop has ended, so queued
    /// messages drain and the failure reaches the caller.
    fn ensure_open(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.lifecycle() {
            SessionState::Open => Ok(()),
            state => Err(SessionError::InvalidState { operation, state }),
        }
    }

    /// Queue one frame on the driver and wait until it is on the wire.
    /// Cancellation abandons the wait.
    async fn transmit(&mut self, frame: Frame) -> Result<(), SessionError> {
        let mut payload = BytesMut::new();
        StompCodec::new().encode(StompItem::Frame(frame), &mut payload)?;
        let Some(link) = self.link.as_ref() else {
            return Err(SessionError::InvalidState {
                operation: "write",
                state: self.state,
            });
        };

        let (done_tx, done_rx) = oneshot::channel();
        let command = Command::Write {
            payload: payload.freeze(),
            done: done_tx,
        };
        let written = async {
            if link.commands.send(command).await.is_err() {
                return Err("receive loop ended".to_string());
            }
            match done_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("receive loop ended".to_string()),
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("cancelled".to_string()),
            result = written => result,
        };
        let reason = match outcome {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };

        self.state = SessionState::Closed;
        if self.cancel.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Err(SessionError::ConnectionLost(reason))
        }
    }

    async fn watch_receipt(&self, id: &str) -> Option<oneshot::Receiver<()>> {
        let link = self.link.as_ref()?;
        let (notify, waiter) = oneshot::channel();
        let command = Command::WatchReceipt {
            id: id.to_string(),
            notify,
        };
        link.commands.send(command).await.ok()?;
        Some(waiter)
    }

    async fn shutdown(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let (done, closed) = oneshot::channel();
        if link.commands.send(Command::Close { done }).await.is_ok() {
            let _ = closed.await;
        }
        drop(link.commands);
        let _ = link.driver.await;
    }
}

/// Background task owning the transport.
struct Driver<T> {
    transport: T,
    commands: mpsc::Receiver<Command>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    version: watch::Sender<Option<String>>,
    receipts: HashMap<String, oneshot::Sender<()>>,
    policy: ErrorPolicy,
    observer: Arc<dyn SessionObserver>,
    cancel: CancellationToken,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("session cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Write { payload, done }) => {
                        let result = self.write(payload).await;
                        let failed = result.is_err();
                        let _ = done.send(result);
                        if failed {
                            break;
                        }
                    }
                    Some(Command::WatchReceipt { id, notify }) => {
                        self.receipts.insert(id, notify);
                    }
                    Some(Command::Close { done }) => {
                        self.close().await;
                        let _ = done.send(());
                        return;
                    }
                    None => break,
                },
                incoming = self.transport.receive() => {
                    let delivery = match incoming {
                        Ok(message) => self.dispatch(&message).transpose(),
                        Err(e) => {
                            debug!(error = %e, "transport receive failed");
                            Some(Err(SessionError::ConnectionLost(e.to_string())))
                        }
                    };
                    match delivery {
                        Some(Ok(body)) => {
                            let _ = self.deliveries.send(Ok(body));
                        }
                        Some(Err(e)) => {
                            let _ = self.deliveries.send(Err(e));
                            break;
                        }
                        None => {}
                    }
                }
            }
        }
        self.close().await;
    }

    async fn write(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if !self.transport.is_open() {
            return Err(TransportError::Closed("transport already closed".to_string()));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Closed("session cancelled".to_string())),
            sent = self.transport.send(payload) => sent,
        }
    }

    async fn close(&mut self) {
        if !self.transport.is_open() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "closing transport failed");
        }
    }

    /// Handle one inbound transport message. Returns the body of a MESSAGE
    /// frame; everything else is housekeeping.
    fn dispatch(&mut self, message: &[u8]) -> Result<Option<Bytes>, SessionError> {
        let frame = match decode_item(message)? {
            StompItem::Heartbeat => {
                trace!("heart-beat");
                return Ok(None);
            }
            StompItem::Frame(frame) => frame,
        };

        match frame.command.as_str() {
            MESSAGE => {
                trace!(
                    destination = frame.get_header("destination").unwrap_or(""),
                    bytes = frame.body.len(),
                    "MESSAGE"
                );
                Ok(Some(Bytes::from(frame.body)))
            }
            CONNECTED => {
                let version = frame.get_header("version");
                debug!(version = version.unwrap_or("unknown"), "CONNECTED");
                self.version.send_replace(version.map(str::to_string));
                self.observer.on_connected(version);
                Ok(None)
            }
            RECEIPT => {
                match frame.get_header("receipt-id") {
                    Some(id) => {
                        debug!(receipt = id, "RECEIPT");
                        self.observer.on_receipt(id);
                        if let Some(waiter) = self.receipts.remove(id) {
                            let _ = waiter.send(());
                        }
                    }
                    None => warn!("RECEIPT without receipt-id"),
                }
                Ok(None)
            }
            ERROR => {
                let error = ServerError::from_frame(frame);
                warn!(message = %error.message, body = ?error.body, "broker sent ERROR");
                self.observer.on_error(&error);
                match self.policy {
                    ErrorPolicy::Log => Ok(None),
                    ErrorPolicy::Fail => Err(SessionError::Server(error)),
                }
            }
            other => {
                trace!(command = other, "discarding frame");
                Ok(None)
            }
        }
    }
}
