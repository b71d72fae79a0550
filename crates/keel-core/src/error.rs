//! Unified error types for the Keel core.
//!
//! These errors never cross a process boundary. The router converts every
//! failure into a `null` slot or a log line before a caller sees it; the
//! types exist so internal helpers can use `?`.

use thiserror::Error;

use crate::process::ProcessId;

// =============================================================================
// IPC Errors
// =============================================================================

/// Errors that can occur while moving frames between processes.
#[derive(Debug, Clone, Error)]
pub enum IpcError {
    /// A frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// Inbound bytes were not a valid frame.
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// The transport refused the frame.
    #[error("failed to send frame to process {target}: {reason}")]
    SendFailed {
        /// Destination process.
        target: ProcessId,
        /// Reason for failure.
        reason: String,
    },

    /// No endpoint is attached under this id.
    #[error("process {0} is not attached to the transport")]
    NotAttached(ProcessId),

    /// A housekeeping request to the main process got no answer in time.
    #[error("request on '{channel}' timed out")]
    Timeout {
        /// Channel of the request.
        channel: String,
    },

    /// The reply channel was dropped before an answer arrived.
    #[error("reply channel closed")]
    Closed,
}

impl IpcError {
    /// Creates a send failure for the given target.
    pub fn send_failed(target: ProcessId, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            target,
            reason: reason.into(),
        }
    }

    /// Creates a timeout error for the given channel.
    pub fn timeout(channel: impl Into<String>) -> Self {
        Self::Timeout {
            channel: channel.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
