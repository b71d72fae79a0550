//! Runtime error types.

use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] keel_core::IpcError),

    #[error("Transport error: {0}")]
    Transport(#[from] keel_transport::TransportError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] keel_framework::PluginError),

    /// A process with this name is already hosted.
    #[error("Process already exists: {0}")]
    ProcessExists(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
