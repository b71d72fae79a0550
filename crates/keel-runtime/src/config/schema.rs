//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KeelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ipc: IpcConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` otherwise.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Rotated files kept next to `file_path`.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of each event.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `keel_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            max_files: default_max_files(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// The configured level, `None` if it is not a tracing level.
    pub fn tracing_level(&self) -> Option<tracing::Level> {
        parse_level(&self.level)
    }
}

/// Parses `trace`, `debug`, `info`, `warn` or `error`, ignoring case.
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(tracing::Level::TRACE),
        "debug" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "warn" => Some(tracing::Level::WARN),
        "error" => Some(tracing::Level::ERROR),
        _ => None,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    5
}

// =============================================================================
// IPC
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcConfig {
    /// Default deadline of `invoke` in milliseconds.
    #[serde(default = "default_ipc_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_ipc_timeout_ms(),
        }
    }
}

impl IpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_ipc_timeout_ms() -> u64 {
    60_000
}

// =============================================================================
// Plugins
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginsConfig {
    /// Plugin base directory; defaults to `<data dir>/keel/plugins`.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// npm registry mirror name (`taobao` or `npm`).
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(default = "default_git_branch")]
    pub git_branch: String,

    /// How long each mirror is measured when racing downloads.
    #[serde(default = "default_probe_window_ms")]
    pub probe_window_ms: u64,

    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            manifest_file: default_manifest_file(),
            registry: default_registry(),
            git_branch: default_git_branch(),
            probe_window_ms: default_probe_window_ms(),
            probe_concurrency: default_probe_concurrency(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl PluginsConfig {
    /// `dir`, or `<data dir>/keel/plugins` when unset.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("keel").join("plugins")))
    }

    pub fn probe_window(&self) -> Duration {
        Duration::from_millis(self.probe_window_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_manifest_file() -> String {
    keel_framework::plugin::DEFAULT_MANIFEST_FILE.to_string()
}

fn default_registry() -> String {
    keel_transport::DEFAULT_NPM_REGISTRY.to_string()
}

fn default_git_branch() -> String {
    "main".to_string()
}

fn default_probe_window_ms() -> u64 {
    3000
}

fn default_probe_concurrency() -> usize {
    5
}

fn default_http_timeout_secs() -> u64 {
    30
}
