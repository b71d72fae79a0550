//! Error types for the Keel plugin framework.
//!
//! Internal helpers return [`PluginResult`]; public operations convert the
//! error into an [`Outcome`] at the boundary so nothing propagates across a
//! process.

use std::path::PathBuf;

use keel_core::Outcome;
use keel_transport::TransportError;
use thiserror::Error;

/// Errors raised while loading, installing or calling plugins.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// The manifest is missing or is not valid JSON.
    #[error("failed to load plugin: {}", .0.display())]
    ManifestUnreadable(PathBuf),

    /// Mandatory manifest fields are absent.
    #[error("plugin is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// The name does not match the identifier pattern.
    #[error("invalid plugin name '{0}'")]
    InvalidName(String),

    /// The version is blank.
    #[error("invalid plugin version for '{0}'")]
    InvalidVersion(String),

    #[error("plugin already exists")]
    AlreadyExists(String),

    #[error("plugin not found")]
    NotFound(String),

    /// No registered module matches the plugin's script.
    #[error("no module found for script '{0}'")]
    ModuleNotFound(String),

    /// A factory or export failed.
    #[error("plugin export failed: {0}")]
    Export(String),

    /// A locator named an unknown strategy.
    #[error("no strategy found for '{0}'")]
    NoStrategy(String),

    #[error("unsupported source '{0}'")]
    UnsupportedSource(String),

    #[error("install already in progress for '{0}'")]
    InstallInProgress(String),

    /// A required external program is missing.
    #[error("{0} is not installed")]
    MissingProgram(String),

    /// An external command exited unsuccessfully.
    #[error("{program} exited with code {code}: {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PluginError {
    pub fn io(e: impl std::fmt::Display) -> Self {
        Self::Io(e.to_string())
    }

    pub fn export(e: impl std::fmt::Display) -> Self {
        Self::Export(e.to_string())
    }

    pub fn command(program: impl Into<String>, code: i32, stderr: impl AsRef<str>) -> Self {
        Self::Command {
            program: program.into(),
            code,
            stderr: stderr.as_ref().trim().to_string(),
        }
    }
}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl<T> From<PluginError> for Outcome<T> {
    fn from(e: PluginError) -> Self {
        Outcome::error(e.to_string())
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_outcome_contract() {
        let missing = PluginError::MissingFields(vec!["version".into()]);
        assert_eq!(missing.to_string(), "plugin is missing required fields: version");

        let outcome: Outcome<bool> = PluginError::AlreadyExists("demo".into()).into();
        assert!(!outcome.is_ok());
        assert_eq!(outcome.message(), "plugin already exists");

        let unreadable = PluginError::ManifestUnreadable(PathBuf::from("/p/demo"));
        assert_eq!(unreadable.to_string(), "failed to load plugin: /p/demo");

        assert_eq!(
            PluginError::NoStrategy("svn".into()).to_string(),
            "no strategy found for 'svn'"
        );
        assert_eq!(
            PluginError::command("npm", 1, "ERR! 404\n").to_string(),
            "npm exited with code 1: ERR! 404"
        );
    }
}
