use std::fmt;

/// Client command opening the STOMP session.
pub const CONNECT: &str = "CONNECT";
/// Client command registering interest in a destination.
pub const SUBSCRIBE: &str = "SUBSCRIBE";
/// Client command dropping a subscription.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
/// Client command publishing a message.
pub const SEND: &str = "SEND";
/// Client command ending the STOMP session.
pub const DISCONNECT: &str = "DISCONNECT";
/// Server reply to `CONNECT`.
pub const CONNECTED: &str = "CONNECTED";
/// Server delivery of a published message.
pub const MESSAGE: &str = "MESSAGE";
/// Server acknowledgement of a `receipt` request.
pub const RECEIPT: &str = "RECEIPT";
/// Server-side failure report.
pub const ERROR: &str = "ERROR";

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered list
/// of headers (key/value pairs) and the raw body bytes. Header names are kept
/// unique: setting a name that is already present replaces its value in
/// place, so the wire order is the order in which names were first set.
///
/// Header values are written to the wire verbatim (no STOMP 1.2 escaping), so
/// they must not contain line feeds and should not contain colons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes; empty means no body
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Set a header (builder style).
    ///
    /// If a header with the same name already exists its value is replaced
    /// and it keeps its original position.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set a header in place. Last write wins for duplicate names.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.headers.push((key, value)),
        }
    }

    /// Request a receipt for this frame (builder style).
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header("receipt", receipt_id)
    }

    /// Set the frame body (builder style).
    ///
    /// This does not touch `content-length`; callers sending a non-empty body
    /// must set that header to the body's byte length before encoding.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name (case-sensitive).
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// A broker `ERROR` frame in structured form.
///
/// The broker puts a short description in the `message` header and, usually,
/// details in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or "unknown error" when the broker omitted it
    pub message: String,
    /// The body decoded as (lossy) UTF-8, if any
    pub body: Option<String>,
    /// The `receipt-id` header when the error answers a receipt request
    pub receipt_id: Option<String>,
    /// The original frame
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.body).into_owned())
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        Self {
            message,
            body,
            receipt_id,
            frame,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, ": {}", body)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
