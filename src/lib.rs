//! Async STOMP 1.2 client over an authenticated WebSocket, for receiving
//! pxGrid push notifications.
//!
//! ```no_run
//! use pxgrid_stomp::{Credentials, Session, SessionConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new(
//!     "wss://ise.example.com:8910/pxgrid/ise/pubsub",
//!     Credentials::new("client-1", "secret"),
//! )?;
//! let mut session = Session::new(config);
//! session.connect().await?;
//! session.subscribe("/topic/com.cisco.ise.session").await?;
//! let payload = session.read_message().await?;
//! println!("{}", String::from_utf8_lossy(&payload));
//! session.disconnect(Some("bye")).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod frame;
pub mod observer;
pub mod parser;
pub mod session;
pub mod tls;
pub mod transport;
pub mod websocket;

pub use codec::{FrameError, StompCodec, StompItem, decode_frame, decode_item, encode_frame};
pub use config::{ConfigError, Credentials, ErrorPolicy, SessionConfig};
pub use frame::{Frame, ServerError};
pub use observer::{NoopObserver, SessionObserver};
pub use session::{STOMP_VERSION, Session, SessionError, SessionState};
pub use tls::TlsOptions;
pub use transport::{Connector, OpenRequest, Transport, TransportError};
pub use websocket::{WsConnector, WsTransport};
