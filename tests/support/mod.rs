//! In-memory transport for driving a `Session` without a network.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use pxgrid_stomp::{
    Connector, Credentials, Frame, OpenRequest, SessionConfig, Transport, TransportError,
    decode_frame,
};
use tokio::sync::mpsc;

pub const URL: &str = "ws://ise.example.com:8910/pxgrid/ise/pubsub";

pub fn config() -> SessionConfig {
    SessionConfig::new(URL, Credentials::new("user", "pass")).expect("valid config")
}

pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("write refused".to_string()));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            // a peer that stopped reading
            std::future::pending::<()>().await;
        }
        let _ = self.outbound.send(payload);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Bytes, TransportError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed("peer hung up".to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out one prepared `MockTransport`, or refuses every open.
pub struct MockConnector {
    transport: Mutex<Option<MockTransport>>,
    requests: Arc<Mutex<Vec<OpenRequest>>>,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self, request: OpenRequest) -> Result<MockTransport, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Closed("connection refused".to_string()))
    }
}

/// The broker's side of a `MockTransport`.
pub struct MockHandle {
    pub inbound: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
    pub requests: Arc<Mutex<Vec<OpenRequest>>>,
    pub closed: Arc<AtomicBool>,
    pub fail_writes: Arc<AtomicBool>,
    pub stall_writes: Arc<AtomicBool>,
}

impl MockHandle {
    /// Queue one raw message for the session to receive.
    pub fn push(&self, wire: &[u8]) {
        self.push_result(Ok(Bytes::copy_from_slice(wire)));
    }

    pub fn push_result(&self, result: Result<Bytes, TransportError>) {
        self.inbound
            .as_ref()
            .expect("connection already hung up")
            .send(result)
            .expect("session dropped its transport");
    }

    /// Drop the inbound side; the session sees the connection close once
    /// queued messages are consumed.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next frame the session wrote.
    pub async fn next_frame(&mut self) -> Frame {
        let payload = self.outbound.recv().await.expect("no frame written");
        decode_frame(&payload).expect("session wrote a malformed frame")
    }

    /// True when nothing has been written since the last `next_frame`.
    pub fn nothing_written(&mut self) -> bool {
        self.outbound.try_recv().is_err()
    }

    pub fn request(&self) -> OpenRequest {
        self.requests.lock().unwrap()[0].clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every later write hang.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Mark the transport closed without the session being told.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn mock() -> (MockConnector, MockHandle) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let fail_writes = Arc::new(AtomicBool::new(false));
    let stall_writes = Arc::new(AtomicBool::new(false));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let transport = MockTransport {
        inbound: inbound_rx,
        outbound: outbound_tx,
        closed: closed.clone(),
        fail_writes: fail_writes.clone(),
        stall_writes: stall_writes.clone(),
    };
    let connector = MockConnector {
        transport: Mutex::new(Some(transport)),
        requests: requests.clone(),
    };
    let handle = MockHandle {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        requests,
        closed,
        fail_writes,
        stall_writes,
    };
    (connector, handle)
}

/// A connector whose every open fails.
pub fn refusing() -> MockConnector {
    MockConnector {
        transport: Mutex::new(None),
        requests: Arc::new(Mutex::new(Vec::new())),
    }
}
