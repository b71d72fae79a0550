//! Local directory strategy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use keel_core::Outcome;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{CallResult, InfoOptions, SourceOptions, Strategy, remove_dir, scan_manifests};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Manifest, PluginConfig, read_manifest, read_manifest_lenient};

/// Copies plugin directories into `<base>/local/<name>`.
///
/// The locator is a filesystem path. A plugin whose manifest sets `debug`
/// is used in place and never copied.
pub struct LocalStrategy {
    options: SourceOptions,
    root: PathBuf,
}

impl LocalStrategy {
    pub fn new(options: SourceOptions) -> Self {
        Self {
            root: options.base_dir.join("local"),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is a managed copy under this strategy's root.
    fn is_managed(&self, path: &Path) -> bool {
        path.starts_with(&self.root) && path != self.root
    }

    /// Where the plugin at `source` lives once installed.
    async fn target(&self, source: &Path) -> PluginResult<(PluginConfig, PathBuf)> {
        let config = read_manifest(source, &self.options.manifest_file).await?;
        let dest = if config.debug || self.is_managed(source) {
            source.to_path_buf()
        } else {
            self.root.join(&config.name)
        };
        Ok((config, dest))
    }

    async fn copy(&self, source: &Path) -> PluginResult<(PluginConfig, PathBuf)> {
        let (config, dest) = self.target(source).await?;
        if dest == source {
            return Ok((config, dest));
        }
        let (from, to) = (source.to_path_buf(), dest.clone());
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(PluginError::io)??;
        Ok((config, dest))
    }

    async fn install_from(&self, action: &str, locator: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        match self.copy(Path::new(locator)).await {
            Ok((config, dest)) => {
                info!(
                    plugin = %config.name,
                    path = %dest.display(),
                    action = %action,
                    "Local plugin copied"
                );
                Outcome::ok(CallResult::measure(config.name, &dest, started).await)
            }
            Err(e) => {
                warn!(source = %locator, action = %action, error = %e, "Local plugin copy failed");
                e.into()
            }
        }
    }
}

/// Replaces `dest` with a copy of the tree at `source`.
fn copy_tree(source: &Path, dest: &Path) -> PluginResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(PluginError::io)?;
        let path = entry.path();
        if path.starts_with(dest) {
            continue;
        }
        let relative = path.strip_prefix(source).map_err(PluginError::io)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(path, &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Strategy for LocalStrategy {
    fn name(&self) -> &str {
        "local"
    }

    /// With `local` the installed copy is read, otherwise the source path.
    async fn info(&self, locator: &str, options: InfoOptions) -> Option<Manifest> {
        let source = Path::new(locator);
        let path = if options.local {
            self.target(source).await.ok()?.1
        } else {
            source.to_path_buf()
        };
        let config = read_manifest_lenient(&path, &self.options.manifest_file).await?;
        Some(Manifest { config, path })
    }

    async fn list(&self, _options: InfoOptions) -> Vec<Manifest> {
        scan_manifests(&self.root, &self.options.manifest_file).await
    }

    async fn install(&self, locator: &str) -> Outcome<CallResult> {
        self.install_from("install", locator).await
    }

    async fn update(&self, locator: &str) -> Outcome<CallResult> {
        self.install_from("update", locator).await
    }

    /// Accepts either the source path or the installed copy.
    async fn uninstall(&self, locator: &str) -> Outcome<CallResult> {
        let path = Path::new(locator);
        let dir = if self.is_managed(path) {
            path.to_path_buf()
        } else {
            match read_manifest_lenient(path, &self.options.manifest_file).await {
                Some(config) if !config.debug => self.root.join(config.name),
                _ => {
                    return Outcome::error(format!("not a managed local plugin: {locator}"));
                }
            }
        };
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        remove_dir(&name, &dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::write_manifest;
    use keel_transport::HttpClient;

    fn strategy(base: &Path) -> LocalStrategy {
        LocalStrategy::new(SourceOptions::new(base, HttpClient::new().unwrap()))
    }

    async fn source(root: &Path, config: &PluginConfig) -> PathBuf {
        let dir = root.join("src").join(&config.name);
        write_manifest(&dir, "plugin.json", config).await.unwrap();
        tokio::fs::create_dir_all(dir.join("lib")).await.unwrap();
        tokio::fs::write(dir.join("lib/index.js"), "exports.x = 1").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_install_copies_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let local = strategy(&tmp.path().join("plugins"));
        let config = PluginConfig::new("demo", "1.0.0").with_script("lib/index.js");
        let src = source(tmp.path(), &config).await;

        let result = local
            .install(&src.to_string_lossy())
            .await
            .into_data()
            .unwrap();
        assert_eq!(result.name, "demo");
        assert_eq!(result.path, local.root().join("demo"));
        assert!(result.path.join("lib/index.js").is_file());

        let installed = local
            .info(&src.to_string_lossy(), InfoOptions::local())
            .await
            .unwrap();
        assert_eq!(installed.config, config);
        assert_eq!(local.list(InfoOptions::local()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_debug_plugin_used_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let local = strategy(&tmp.path().join("plugins"));
        let config = PluginConfig {
            debug: true,
            ..PluginConfig::new("dev", "0.0.1")
        };
        let src = source(tmp.path(), &config).await;

        let result = local.install(&src.to_string_lossy()).await.into_data().unwrap();
        assert_eq!(result.path, src);
        assert!(!local.root().join("dev").exists());

        let outcome = local.uninstall(&src.to_string_lossy()).await;
        assert!(!outcome.is_ok());
        assert!(src.join("plugin.json").is_file());
    }

    #[tokio::test]
    async fn test_update_recopies_and_uninstall_removes_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let local = strategy(&tmp.path().join("plugins"));
        let src = source(tmp.path(), &PluginConfig::new("demo", "1.0.0")).await;
        let locator = src.to_string_lossy().into_owned();
        local.install(&locator).await;

        write_manifest(&src, "plugin.json", &PluginConfig::new("demo", "1.1.0"))
            .await
            .unwrap();
        assert!(local.update(&locator).await.is_ok());
        let installed = local.info(&locator, InfoOptions::local()).await.unwrap();
        assert_eq!(installed.config.version, "1.1.0");

        assert!(local.uninstall(&locator).await.is_ok());
        assert!(!local.root().join("demo").exists());
        assert!(src.is_dir());
    }

    #[tokio::test]
    async fn test_invalid_source() {
        let tmp = tempfile::tempdir().unwrap();
        let local = strategy(tmp.path());
        let outcome = local.install(&tmp.path().join("nothing").to_string_lossy()).await;
        assert!(outcome.message().starts_with("failed to load plugin: "));
    }
}
