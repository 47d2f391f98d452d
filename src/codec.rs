use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::parser::{eol_len, parse_frame_slice};

/// Errors raised while turning frames into bytes or bytes into frames.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The outbound frame cannot be put on the wire as built.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// The inbound bytes are not a STOMP frame.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// I/O-level error surfaced through the `tokio_util` codec traits
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a bare EOL received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF or CRLF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire format used over the WebSocket.
///
/// Header values are written verbatim, without STOMP 1.2 escaping, and a
/// frame's body always ends at the first NUL byte.
#[derive(Debug)]
pub struct StompCodec {}

impl StompCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = FrameError;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when the buffer does not
    /// yet hold a complete item.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let eol = eol_len(src.chunk());
        if eol > 0 {
            src.advance(eol);
            return Ok(Some(StompItem::Heartbeat));
        }

        match parse_frame_slice(src.chunk()) {
            Ok(Some((cmd_bytes, headers, body, consumed))) => {
                src.advance(consumed);

                let command = String::from_utf8(cmd_bytes).map_err(|e| {
                    FrameError::Malformed(format!("invalid utf8 in command: {}", e))
                })?;
                let mut frame = Frame::new(command);
                for (k, v) in headers {
                    let ks = String::from_utf8(k).map_err(|e| {
                        FrameError::Malformed(format!("invalid utf8 in header key: {}", e))
                    })?;
                    let vs = String::from_utf8(v).map_err(|e| {
                        FrameError::Malformed(format!("invalid utf8 in header value: {}", e))
                    })?;
                    frame.set_header(ks, vs);
                }
                frame.body = body;
                Ok(Some(StompItem::Frame(frame)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(FrameError::Malformed(e)),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                Ok(())
            }
            StompItem::Frame(frame) => write_frame(&frame, dst),
        }
    }
}

fn check_token(kind: &str, token: &str) -> Result<(), FrameError> {
    if token.bytes().any(|b| matches!(b, b'\n' | b'\r' | 0)) {
        return Err(FrameError::Encoding(format!(
            "{} {:?} contains a line break or NUL",
            kind, token
        )));
    }
    Ok(())
}

fn validate(frame: &Frame) -> Result<(), FrameError> {
    if frame.command.is_empty() {
        return Err(FrameError::Encoding("frame command is empty".to_string()));
    }
    check_token("command", &frame.command)?;
    for (k, v) in &frame.headers {
        check_token("header name", k)?;
        if k.contains(':') {
            return Err(FrameError::Encoding(format!(
                "header name {:?} contains ':'",
                k
            )));
        }
        check_token("header value", v)?;
    }
    if !frame.body.is_empty() {
        if frame.body.contains(&0) {
            return Err(FrameError::Encoding(
                "body contains a NUL byte".to_string(),
            ));
        }
        let declared = frame.get_header("content-length");
        if declared != Some(frame.body.len().to_string().as_str()) {
            return Err(FrameError::Encoding(format!(
                "content-length {:?} does not match body length {}",
                declared,
                frame.body.len()
            )));
        }
    }
    Ok(())
}

fn write_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
    validate(frame)?;

    dst.extend_from_slice(frame.command.as_bytes());
    dst.put_u8(b'\n');
    for (k, v) in &frame.headers {
        dst.extend_from_slice(k.as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(v.as_bytes());
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
    dst.extend_from_slice(&frame.body);
    dst.put_u8(0);
    Ok(())
}

/// Encode one frame into its wire bytes.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, FrameError> {
    let mut dst = BytesMut::with_capacity(64 + frame.body.len());
    write_frame(frame, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one complete transport message.
///
/// The message must hold a whole frame; anything after the frame's NUL
/// terminator is discarded. A message consisting only of EOLs is a
/// heartbeat.
pub fn decode_item(message: &[u8]) -> Result<StompItem, FrameError> {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(message);
    loop {
        match codec.decode(&mut buf)? {
            Some(StompItem::Frame(frame)) => return Ok(StompItem::Frame(frame)),
            Some(StompItem::Heartbeat) if buf.is_empty() => return Ok(StompItem::Heartbeat),
            Some(StompItem::Heartbeat) => {}
            None if buf.is_empty() => {
                return Err(FrameError::Malformed("missing command line".to_string()));
            }
            None => {
                return Err(FrameError::Malformed(
                    "incomplete frame: missing blank line or NUL terminator".to_string(),
                ));
            }
        }
    }
}

/// Decode one complete transport message that must carry a frame.
pub fn decode_frame(message: &[u8]) -> Result<Frame, FrameError> {
    match decode_item(message)? {
        StompItem::Frame(frame) => Ok(frame),
        StompItem::Heartbeat => Err(FrameError::Malformed("missing command line".to_string())),
    }
}
