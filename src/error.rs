//! Error types for http-dl
//!
//! Synchronous API misuse (bad configuration, usage-guard violations) is returned
//! directly from the call that caused it. Failures that happen while a transfer is
//! running never cross the asynchronous boundary as a returned error: they are
//! recorded on the task (see [`DownloadTask::error_cause`](crate::DownloadTask::error_cause))
//! and delivered once as the terminal [`Event::Error`](crate::Event::Error).

use crate::types::TaskId;
use std::fmt;
use thiserror::Error;

/// Result type alias for http-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for http-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Task or engine configuration is unusable (bad URL, missing path, malformed header)
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "url")
        key: Option<String>,
    },

    /// The target path was never set, or the filename is not resolved yet
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// `start()`, `ready()` or `reuse()` violated the task usage guards
    #[error("cannot {operation} task {id}: task is already in use")]
    AlreadyInUse {
        /// The task the operation was attempted on
        id: TaskId,
        /// The operation that was attempted (e.g., "start", "reuse")
        operation: String,
    },

    /// Transport failure (connection, HTTP status, truncated body)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The transfer was stopped by an explicit pause
    #[error("cancelled by user")]
    UserCancelled,

    /// Breakpoint storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLx database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfiguration`] tied to a configuration key
    pub fn invalid_config(key: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Returns the transport error if this is one
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Classification of a transport failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connect or read timed out
    Timeout,
    /// Could not establish a connection
    Connect,
    /// Any other network-level failure while the request or body was in flight
    Network,
    /// The server answered with an unexpected HTTP status
    Status(u16),
    /// The server rejected the conditional resume request (etag mismatch, bad range)
    PreconditionFailed,
    /// The response did not match what was negotiated (e.g., short body)
    InvalidResponse,
    /// The partial data on disk cannot be resumed from
    Corrupted,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Connect => write!(f, "connect failed"),
            TransportErrorKind::Network => write!(f, "network failure"),
            TransportErrorKind::Status(code) => write!(f, "HTTP {}", code),
            TransportErrorKind::PreconditionFailed => write!(f, "precondition failed"),
            TransportErrorKind::InvalidResponse => write!(f, "invalid response"),
            TransportErrorKind::Corrupted => write!(f, "corrupted partial data"),
        }
    }
}

/// Failure reported by a [`Transport`](crate::transport::Transport)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// What went wrong
    pub kind: TransportErrorKind,
    /// Detail for logs and observers
    pub message: String,
}

impl TransportError {
    /// Create a new transport error
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error for an unexpected HTTP status code
    pub fn status(code: u16) -> Self {
        Self::new(
            TransportErrorKind::Status(code),
            format!("server responded with status {}", code),
        )
    }

    /// Whether the server refused the conditional resume request
    pub fn is_precondition_failed(&self) -> bool {
        self.kind == TransportErrorKind::PreconditionFailed
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if let Some(status) = e.status() {
            TransportErrorKind::Status(status.as_u16())
        } else {
            TransportErrorKind::Network
        };
        Self::new(kind, e.to_string())
    }
}
