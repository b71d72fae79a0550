//! Loaded-plugin state and export invocation.
//!
//! [`LifecycleManager`] is the sole owner of every loaded [`Lifecycle`]. It:
//!
//! - Loads plugin directories: reads and validates the manifest, rejects
//!   duplicate names, resolves the script for this process's role and
//!   evaluates it through the configured [`ModuleSource`].
//! - Unloads plugins, awaiting their `destroy` export first.
//! - Calls an export on every enabled plugin **concurrently** and returns one
//!   slot per participating plugin, in load order.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = LifecycleManager::new(router, Arc::new(modules));
//! manager.load(Path::new("/plugins/local/demo")).await;
//! let versions = manager.call("getVersion", vec![], PluginCallOptions::default()).await;
//! ```

use std::path::Path;
use std::sync::Arc;

use futures::future;
use keel_core::{IpcRouter, Outcome};
use serde_json::Value;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{
    DEFAULT_MANIFEST_FILE, HostContext, Lifecycle, Manifest, ModuleSource, PluginCallOptions,
    read_manifest,
};

/// Owns the loaded plugins of one process.
pub struct LifecycleManager {
    plugins: AsyncRwLock<Vec<Arc<Lifecycle>>>,
    router: IpcRouter,
    source: Arc<dyn ModuleSource>,
    manifest_file: String,
}

impl LifecycleManager {
    pub fn new(router: IpcRouter, source: Arc<dyn ModuleSource>) -> Self {
        Self {
            plugins: AsyncRwLock::new(Vec::new()),
            router,
            source,
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }

    /// Uses `file` instead of `plugin.json` as the manifest name.
    pub fn with_manifest_file(mut self, file: impl Into<String>) -> Self {
        self.manifest_file = file.into();
        self
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn router(&self) -> &IpcRouter {
        &self.router
    }

    // ─── Loading ─────────────────────────────────────────────────────────────

    /// Loads the plugin in `dir`.
    pub async fn load(&self, dir: &Path) -> Outcome<bool> {
        match self.try_load(dir).await {
            Ok(name) => {
                info!(plugin = %name, path = %dir.display(), "Plugin loaded");
                Outcome::ok(true)
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Plugin load failed");
                e.into()
            }
        }
    }

    async fn try_load(&self, dir: &Path) -> PluginResult<String> {
        let config = read_manifest(dir, &self.manifest_file).await?;
        let name = config.name.clone();
        if self.contains(&name).await {
            return Err(PluginError::AlreadyExists(name));
        }

        let ctx = HostContext {
            router: self.router.clone(),
            process: self.router.process().clone(),
            path: dir.to_path_buf(),
            config: config.clone(),
        };
        let manifest = Manifest {
            config,
            path: dir.to_path_buf(),
        };
        let lifecycle = Arc::new(Lifecycle::new(
            manifest,
            self.router.process().role(),
            Arc::clone(&self.source),
            ctx,
        ));
        lifecycle.mounted().await?;

        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|p| p.name() == name) {
            drop(plugins);
            lifecycle.unmounted().await;
            return Err(PluginError::AlreadyExists(name));
        }
        plugins.push(lifecycle);
        Ok(name)
    }

    /// Unloads plugin `name`, awaiting its `destroy` export.
    pub async fn unload(&self, name: &str) -> Outcome<bool> {
        let removed = {
            let mut plugins = self.plugins.write().await;
            plugins
                .iter()
                .position(|p| p.name() == name)
                .map(|pos| plugins.remove(pos))
        };
        match removed {
            Some(lifecycle) => {
                lifecycle.unmounted().await;
                info!(plugin = %name, "Plugin unloaded");
                Outcome::ok(true)
            }
            None => PluginError::NotFound(name.to_string()).into(),
        }
    }

    /// Unloads every plugin, in reverse load order.
    pub async fn unload_all(&self) {
        let drained: Vec<Arc<Lifecycle>> = self.plugins.write().await.drain(..).rev().collect();
        for lifecycle in drained {
            lifecycle.unmounted().await;
            info!(plugin = %lifecycle.name(), "Plugin unloaded");
        }
    }

    // ─── Invocation ──────────────────────────────────────────────────────────

    /// Runs `export` on every matching plugin concurrently.
    ///
    /// `options.name` restricts the call to one plugin; other plugins
    /// contribute no slot. Disabled plugins and plugins without the export
    /// yield `null`.
    pub async fn call(
        &self,
        export: &str,
        args: Vec<Value>,
        options: PluginCallOptions,
    ) -> Vec<Value> {
        let targets: Vec<Arc<Lifecycle>> = {
            let plugins = self.plugins.read().await;
            plugins
                .iter()
                .filter(|p| options.name.as_deref().is_none_or(|name| p.name() == name))
                .cloned()
                .collect()
        };

        future::join_all(targets.iter().map(|lifecycle| {
            let args = args.clone();
            async move { lifecycle.call(export, args).await }
        }))
        .await
    }

    // ─── State ───────────────────────────────────────────────────────────────

    pub async fn enable(&self, name: &str) -> Outcome<bool> {
        match self.get(name).await {
            Some(lifecycle) => {
                lifecycle.enable();
                info!(plugin = %name, "Plugin enabled");
                Outcome::ok(true)
            }
            None => PluginError::NotFound(name.to_string()).into(),
        }
    }

    pub async fn disable(&self, name: &str) -> Outcome<bool> {
        match self.get(name).await {
            Some(lifecycle) => {
                lifecycle.disable();
                info!(plugin = %name, "Plugin disabled");
                Outcome::ok(true)
            }
            None => PluginError::NotFound(name.to_string()).into(),
        }
    }

    /// Manifests of the loaded plugins, in load order.
    pub async fn list(&self) -> Vec<Manifest> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|p| p.manifest().clone())
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Lifecycle>> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.read().await.iter().any(|p| p.name() == name)
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}
