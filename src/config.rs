//! Explicit session configuration.
//!
//! Everything a [`Session`](crate::Session) needs is carried in a
//! [`SessionConfig`] value built by the caller; nothing is read from the
//! environment or from process-wide state.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::observer::{NoopObserver, SessionObserver};
use crate::tls::TlsOptions;

/// Default WebSocket keepalive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default time `disconnect` waits for the broker's RECEIPT.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while building a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("url has no host")]
    MissingHost,
    #[error("unsupported url scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in '{}'", .0.display())]
    NoCertificates(PathBuf),
    #[error("no private key found in '{}'", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

/// User name and password presented with HTTP Basic authentication during
/// the WebSocket handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Value for the `Authorization` handshake header.
    pub fn basic_authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {}", token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the receive loop does with a broker ERROR frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log the frame and keep reading.
    #[default]
    Log,
    /// End the session; `read_message` returns the error.
    Fail,
}

/// Connection parameters for one [`Session`](crate::Session).
#[derive(Clone)]
pub struct SessionConfig {
    url: Url,
    host: String,
    credentials: Credentials,
    tls: Option<Arc<rustls::ClientConfig>>,
    ping_interval: Option<Duration>,
    receipt_timeout: Duration,
    error_policy: ErrorPolicy,
    observer: Arc<dyn SessionObserver>,
    cancel: Option<CancellationToken>,
}

impl SessionConfig {
    /// Create a configuration for the WebSocket endpoint `url`.
    ///
    /// The STOMP virtual host defaults to the URL's host. For `wss://` URLs a
    /// TLS context trusting the webpki roots is installed; replace it with
    /// [`with_tls`](Self::with_tls) to add a CA bundle or client identity.
    pub fn new(url: &str, credentials: Credentials) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingHost)?
            .to_string();
        let tls = if secure {
            Some(TlsOptions::default().build()?)
        } else {
            None
        };

        Ok(Self {
            url,
            host,
            credentials,
            tls,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            error_policy: ErrorPolicy::default(),
            observer: Arc::new(NoopObserver),
            cancel: None,
        })
    }

    /// Override the `host` header sent in CONNECT.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Keepalive ping interval; `None` (or zero) disables pings.
    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Tie the session to a parent token; cancelling it ends the session.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn tls(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls.as_ref()
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    pub fn observer(&self) -> &Arc<dyn SessionObserver> {
        &self.observer
    }

    pub(crate) fn parent_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url.as_str())
            .field("host", &self.host)
            .field("credentials", &self.credentials)
            .field("tls", &self.tls.is_some())
            .field("ping_interval", &self.ping_interval)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("error_policy", &self.error_policy)
            .finish_non_exhaustive()
    }
}
