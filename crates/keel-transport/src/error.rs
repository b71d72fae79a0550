//! Error types for the transport helpers.

use thiserror::Error;

/// Errors raised while talking to the network or to external programs.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// A downloaded archive could not be unpacked.
    #[error("archive error: {0}")]
    Archive(String),

    /// An external program could not be started.
    #[error("failed to run '{program}': {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// Reason for failure.
        reason: String,
    },

    /// Every mirror candidate failed.
    #[error("no reachable mirror")]
    NoMirror,
}

impl TransportError {
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn archive(reason: impl Into<String>) -> Self {
        Self::Archive(reason.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match (e.status(), e.url()) {
            (Some(status), Some(url)) => Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => Self::Request(e.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
