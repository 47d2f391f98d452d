use crate::frame::ServerError;

/// Hooks for the housekeeping frames the receive loop consumes.
///
/// `read_message` only ever hands MESSAGE bodies to the caller; CONNECTED,
/// RECEIPT and ERROR frames are reported here instead. All methods default to
/// doing nothing. They run on the session's driver task, so they must not
/// block.
pub trait SessionObserver: Send + Sync {
    /// The broker accepted the STOMP handshake.
    fn on_connected(&self, _version: Option<&str>) {}

    /// The broker acknowledged a frame that requested a receipt.
    fn on_receipt(&self, _receipt_id: &str) {}

    /// The broker sent an ERROR frame.
    fn on_error(&self, _error: &ServerError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
