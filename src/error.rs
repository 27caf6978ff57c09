use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed underlying cause attached to a classified proxy failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fixed taxonomy of proxy failures
///
/// Sub-kinds (`Dns`, `Tls`, `ConnectionReset` under connection errors and
/// `InvalidHeaders`, `InvalidContentLength`, `HttpStatus` under invalid
/// responses) are flattened into the same enum; use [`ErrorKind::is_connection`]
/// and [`ErrorKind::is_invalid_response`] to test the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoProxiesAvailable,
    Connection,
    Dns,
    Tls,
    ConnectionReset,
    AuthenticationFailed,
    ConnectionTimeout,
    Blocked,
    AllProxiesExhausted,
    ValidationFailed,
    RateLimited,
    InvalidResponse,
    InvalidHeaders,
    InvalidContentLength,
    HttpStatus,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoProxiesAvailable => "no_proxies_available",
            ErrorKind::Connection => "connection",
            ErrorKind::Dns => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::ConnectionTimeout => "connection_timeout",
            ErrorKind::Blocked => "blocked",
            ErrorKind::AllProxiesExhausted => "all_proxies_exhausted",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::InvalidHeaders => "invalid_headers",
            ErrorKind::InvalidContentLength => "invalid_content_length",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether errors of this kind are worth retrying unless told otherwise
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Dns
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionTimeout
                | ErrorKind::RateLimited
                | ErrorKind::HttpStatus
        )
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection | ErrorKind::Dns | ErrorKind::Tls | ErrorKind::ConnectionReset
        )
    }

    pub fn is_invalid_response(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidResponse
                | ErrorKind::InvalidHeaders
                | ErrorKind::InvalidContentLength
                | ErrorKind::HttpStatus
        )
    }

    /// Pool-level kinds are the only ones the façade surfaces on its own
    pub fn is_pool_level(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoProxiesAvailable | ErrorKind::AllProxiesExhausted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of a single proxy
///
/// Built once by the classifier (or a transport) and never mutated afterwards;
/// the `with_*` methods consume and return the value.
#[derive(Error, Debug)]
#[error(
    "{kind}{target}: {message}{status_suffix}",
    target = render_target(.host, .port),
    status_suffix = render_status(.status)
)]
pub struct ProxyError {
    kind: ErrorKind,
    message: String,
    host: Option<String>,
    port: Option<u16>,
    retryable: bool,
    status: Option<StatusCode>,
    retry_after: Option<Duration>,
    #[source]
    source: Option<BoxError>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            host: None,
            port: None,
            retryable: kind.is_retryable_by_default(),
            status: None,
            retry_after: None,
            source: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionTimeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn with_target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

fn render_target(host: &Option<String>, port: &Option<u16>) -> String {
    match (host, port) {
        (Some(host), Some(port)) => format!(" via {}:{}", host, port),
        _ => String::new(),
    }
}

fn render_status(status: &Option<StatusCode>) -> String {
    status
        .map(|s| format!(" (status {})", s.as_u16()))
        .unwrap_or_default()
}

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum Error {
    // Pool-level conditions
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("All proxies exhausted after {attempts} attempts")]
    AllProxiesExhausted { attempts: usize },

    // Classified per-proxy failures
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Collaborator errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for proxy pool operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Project this error onto the proxy failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoProxiesAvailable => ErrorKind::NoProxiesAvailable,
            Error::AllProxiesExhausted { .. } => ErrorKind::AllProxiesExhausted,
            Error::Proxy(e) => e.kind(),
            Error::InvalidProxyAddress(_) | Error::UnsupportedProtocol(_) => {
                ErrorKind::ValidationFailed
            }
            Error::InvalidConfig(_)
            | Error::Store(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Proxy(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidProxyAddress(err.to_string())
    }
}
