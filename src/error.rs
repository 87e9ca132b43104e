//! Error types for the reqwest-tor-rotator crate.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Invalid handler configuration. Raised at construction and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The proxy transport is not one of http, socks4 or socks5.
    #[error("unknown proxy transport {0:?}, expected one of \"h\", \"H\", 4 or 5")]
    UnknownTransport(String),
    /// A rotation threshold was zero.
    #[error("{0} must be at least 1")]
    ZeroThreshold(&'static str),
    /// The user agent pool had no usable entries.
    #[error("user agent pool is empty")]
    EmptyUserAgentPool,
    /// A user agent cannot be sent as a header value.
    #[error("invalid user agent {0:?}")]
    InvalidUserAgent(String),
    /// The proxy map could not be turned into a reqwest proxy.
    #[error("invalid proxy {url}: {reason}")]
    InvalidProxy { url: String, reason: String },
}

/// A failure while issuing the HTTP request itself.
///
/// The handler counts these and retries; they never reach the caller of `get`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Building the proxied client failed.
    #[error("failed to build proxied client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request failed in flight (connect, DNS, timeout, ...).
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// Proxy configuration rejected by reqwest.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The user agent is not a valid header value.
    #[error("invalid user agent header: {0}")]
    UserAgent(#[from] http::header::InvalidHeaderValue),
}

/// A failure while rotating the network identity over the control port.
///
/// This is the only error `RequestHandler::get` can return.
#[derive(Debug, Error)]
pub enum RotationError {
    /// Could not open the control connection.
    #[error("failed to connect to control port {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The control port rejected authentication.
    #[error("control port authentication failed: {0}")]
    Authenticate(String),
    /// The control port rejected the new identity signal.
    #[error("NEWNYM signal rejected: {0}")]
    Signal(String),
    /// The control conversation did not finish in time.
    #[error("control port did not answer within {0:?}")]
    Timeout(Duration),
    /// I/O failure mid-conversation.
    #[error("control port I/O error: {0}")]
    Io(#[from] io::Error),
}
