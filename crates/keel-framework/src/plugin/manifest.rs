//! Plugin manifests, update records and call options.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use keel_core::ProcessRole;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, PluginResult};

/// Default manifest file name inside a plugin directory.
pub const DEFAULT_MANIFEST_FILE: &str = "plugin.json";

/// Sidecar written next to an installed plugin.
pub const UPDATE_FILE: &str = "update.json";

/// Manifest fields that must be present.
pub const REQUIRED_FIELDS: &[&str] = &["name", "version"];

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]+$").expect("Invalid name pattern"));

/// Returns `true` if `name` is a valid plugin identifier.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

// =============================================================================
// PluginConfig
// =============================================================================

/// Entry script(s) of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptPath {
    /// One script for every process role.
    Single(String),
    /// A script per role.
    Split { main: String, renderer: String },
}

impl Default for ScriptPath {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

impl ScriptPath {
    /// The script for `role`; empty means the plugin is inert there.
    pub fn resolve(&self, role: ProcessRole) -> &str {
        match (self, role) {
            (Self::Single(path), _) => path,
            (Self::Split { main, .. }, ProcessRole::Main) => main,
            (Self::Split { renderer, .. }, ProcessRole::Renderer) => renderer,
        }
    }
}

/// The `plugin.json` manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub name: String,
    pub version: String,
    pub icon: String,
    pub description: String,
    /// Re-evaluate the script before every call.
    pub hot: bool,
    /// Local development plugin, used in place.
    pub debug: bool,
    pub script: ScriptPath,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = ScriptPath::Single(script.into());
        self
    }

    /// Parses a manifest value, requiring the mandatory fields.
    pub fn from_value(value: Value) -> PluginResult<Self> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| value.get(**field).is_none())
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PluginError::MissingFields(missing));
        }
        serde_json::from_value(value).map_err(|e| PluginError::Export(e.to_string()))
    }

    /// Checks the identifier pattern and the version.
    pub fn validate(&self) -> PluginResult<()> {
        if !is_valid_name(&self.name) {
            return Err(PluginError::InvalidName(self.name.clone()));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::InvalidVersion(self.name.clone()));
        }
        Ok(())
    }
}

/// A parsed manifest and the directory it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub config: PluginConfig,
    pub path: PathBuf,
}

/// Reads `<dir>/<file>` without checking required fields.
///
/// Used for remote and listing lookups where missing fields are tolerated.
pub async fn read_manifest_lenient(dir: &Path, file: &str) -> Option<PluginConfig> {
    let bytes = tokio::fs::read(dir.join(file)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Reads and validates `<dir>/<file>`.
pub async fn read_manifest(dir: &Path, file: &str) -> PluginResult<PluginConfig> {
    let unreadable = || PluginError::ManifestUnreadable(dir.to_path_buf());
    let bytes = tokio::fs::read(dir.join(file))
        .await
        .map_err(|_| unreadable())?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|_| unreadable())?;
    if !value.is_object() {
        return Err(unreadable());
    }
    let config = PluginConfig::from_value(value).map_err(|e| match e {
        PluginError::MissingFields(_) => e,
        _ => unreadable(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Writes `config` as pretty JSON to `<dir>/<file>`.
pub async fn write_manifest(dir: &Path, file: &str, config: &PluginConfig) -> PluginResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    let json = serde_json::to_vec_pretty(config).map_err(PluginError::io)?;
    tokio::fs::write(dir.join(file), json).await?;
    Ok(())
}

// =============================================================================
// UpdateRecord
// =============================================================================

/// Where an installed plugin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Npm,
    Local,
    Url,
    Github,
    Gitee,
}

impl SourceKind {
    /// Name of the strategy that installs this kind of source.
    pub fn strategy(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Local => "local",
            Self::Url | Self::Github | Self::Gitee => "git",
        }
    }
}

/// Contents of `update.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// The source string the plugin was installed from.
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
}

impl UpdateRecord {
    pub fn new(url: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    /// Reads the record next to a plugin; `None` if absent or malformed.
    pub async fn read(dir: &Path) -> Option<Self> {
        let bytes = tokio::fs::read(dir.join(UPDATE_FILE)).await.ok()?;
        serde_json::from_slice::<Self>(&bytes)
            .ok()
            .filter(|record| !record.url.is_empty())
    }

    pub async fn write(&self, dir: &Path) -> PluginResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(PluginError::io)?;
        tokio::fs::write(dir.join(UPDATE_FILE), json).await?;
        Ok(())
    }
}

/// Options of a plugin `call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginCallOptions {
    /// Restrict the call to the plugin with this name.
    pub name: Option<String>,
}

impl PluginCallOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}
