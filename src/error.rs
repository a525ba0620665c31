//! Error types for oauth-imap-probe

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification attached to every failed account.
///
/// Callers use this to tell "needs re-authorization" apart from
/// "transient network issue" or "provider rejected the request".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// DNS, TCP connect, or TLS handshake failure.
    #[serde(rename = "NetworkError")]
    Network,
    /// The bearer token was rejected as expired or invalid.
    AuthExpired,
    /// The credential is malformed or was permanently rejected.
    #[serde(rename = "AuthError")]
    Auth,
    /// The server sent something malformed or unexpected.
    #[serde(rename = "ProtocolError")]
    Protocol,
    /// A phase, or the whole run, exceeded its time bound.
    Timeout,
    /// The run was cancelled by the caller.
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "NetworkError",
            Self::AuthExpired => "AuthExpired",
            Self::Auth => "AuthError",
            Self::Protocol => "ProtocolError",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credential: {0}")]
    InvalidCredential(&'static str),

    #[error("token rejected as expired or invalid: {0}")]
    AuthExpired(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map this error onto the per-account failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Tls(_) | Self::Io(_) => ErrorKind::Network,
            Self::AuthExpired(_) => ErrorKind::AuthExpired,
            Self::InvalidCredential(_) | Self::Auth(_) | Self::Config(_) => ErrorKind::Auth,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
