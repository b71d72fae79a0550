//! The plugin manager: acquisition plus lifecycle, exposed over IPC.
//!
//! [`PluginManager`] composes a [`LifecycleManager`] with a [`StrategySet`].
//! Once [`init`](PluginManager::init) has run it answers the
//! `plugin-install`, `plugin-uninstall` and `plugin-call` channels, so any
//! process can drive it through a [`PluginClient`](crate::PluginClient).
//!
//! ```text
//! install(source)
//!   ├─ detect strategy (type+uri, gitee, github, path, npm)
//!   ├─ strategy.install(uri)        ──► <base>/<strategy>/<name>
//!   ├─ write update.json {url, type}
//!   └─ lifecycle.load(dir)
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};

use keel_core::{BindingHandle, HandlerEvent, InvokeOptions, IpcRouter, Outcome};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::manager::LifecycleManager;
use crate::plugin::{Manifest, ModuleSource, PluginCallOptions, SourceKind, UpdateRecord};
use crate::sources::{
    InfoOptions, InstallEvent, SourceOptions, Strategy, StrategySet, parse_locator,
};

/// Channel answering install requests: `[source, name?]`.
pub const INSTALL_CHANNEL: &str = "plugin-install";
/// Channel answering uninstall requests: `[name]`.
pub const UNINSTALL_CHANNEL: &str = "plugin-uninstall";
/// Channel answering export calls: `[export, args, options]`.
pub const CALL_CHANNEL: &str = "plugin-call";
/// Notification sent before a plugin is replaced by a newer version: `[name]`.
pub const UPDATE_CHANNEL: &str = "plugin-update";
/// Logical name of a dedicated plugin-host process.
pub const PLUGIN_PROCESS_NAME: &str = "plugin";

/// Outcome of an update sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub up_to_date: Vec<String>,
    /// Plugins without an update record, without remote info, or whose
    /// reinstall failed.
    pub skipped: Vec<String>,
}

/// Where a source string installs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSource {
    pub strategy: String,
    pub uri: String,
    pub kind: SourceKind,
}

/// Maps a source string to a strategy.
///
/// - `type+uri` selects the strategy directly;
/// - `https://gitee.com/…` and `https://github.com/…` use `git`;
/// - any other `http` URL is unsupported;
/// - an existing path uses `local`;
/// - anything else is an npm module name.
pub fn detect_source(source: &str) -> PluginResult<DetectedSource> {
    let detected = |strategy: &str, uri: &str, kind| DetectedSource {
        strategy: strategy.to_string(),
        uri: uri.to_string(),
        kind,
    };
    if let Some((strategy, uri)) = parse_locator(source) {
        let kind = match strategy {
            "npm" => SourceKind::Npm,
            "local" => SourceKind::Local,
            "git" if uri.starts_with("https://gitee.com/") => SourceKind::Gitee,
            "git" if uri.starts_with("https://github.com/") => SourceKind::Github,
            _ => SourceKind::Url,
        };
        return Ok(detected(strategy, uri, kind));
    }
    if source.starts_with("https://gitee.com/") {
        return Ok(detected("git", source, SourceKind::Gitee));
    }
    if source.starts_with("https://github.com/") {
        return Ok(detected("git", source, SourceKind::Github));
    }
    if source.starts_with("http") {
        return Err(PluginError::UnsupportedSource(source.to_string()));
    }
    if Path::new(source).exists() {
        return Ok(detected("local", source, SourceKind::Local));
    }
    Ok(detected("npm", source, SourceKind::Npm))
}

/// Where a recorded install came from.
///
/// An explicit `type+uri` locator is kept as is. Otherwise the strategy
/// follows the recorded kind, so a local source that has since been deleted
/// never falls through to npm.
fn recorded_source(record: &UpdateRecord) -> DetectedSource {
    match parse_locator(&record.url) {
        Some((strategy, uri)) => DetectedSource {
            strategy: strategy.to_string(),
            uri: uri.to_string(),
            kind: record.kind,
        },
        None => DetectedSource {
            strategy: record.kind.strategy().to_string(),
            uri: record.url.clone(),
            kind: record.kind,
        },
    }
}

/// Clears a per-source install lock on drop.
struct InstallGuard<'a> {
    installing: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.installing.lock().remove(&self.key);
    }
}

// =============================================================================
// PluginManager
// =============================================================================

/// Installs, loads, updates and removes plugins for one process.
pub struct PluginManager {
    lifecycle: LifecycleManager,
    strategies: RwLock<StrategySet>,
    options: SourceOptions,
    installing: Mutex<HashSet<String>>,
    bindings: Mutex<Vec<BindingHandle>>,
}

impl PluginManager {
    /// Creates a manager with the built-in strategies.
    pub fn new(
        router: IpcRouter,
        source: Arc<dyn ModuleSource>,
        options: SourceOptions,
    ) -> Arc<Self> {
        let lifecycle =
            LifecycleManager::new(router, source).with_manifest_file(options.manifest_file.clone());
        Arc::new(Self {
            lifecycle,
            strategies: RwLock::new(StrategySet::new(options.clone())),
            options,
            installing: Mutex::new(HashSet::new()),
            bindings: Mutex::new(Vec::new()),
        })
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn router(&self) -> &IpcRouter {
        self.lifecycle.router()
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    /// Registers or replaces a strategy.
    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.strategies.write().insert(strategy);
    }

    pub fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.read().get(name)
    }

    /// Install progress from every strategy.
    pub fn events(&self) -> broadcast::Receiver<InstallEvent> {
        self.options.subscribe()
    }

    // ─── Startup / shutdown ──────────────────────────────────────────────────

    /// Loads every installed plugin and binds the plugin channels.
    ///
    /// Returns the number of plugins loaded. Individual load failures are
    /// logged and skipped.
    pub async fn init(self: &Arc<Self>) -> PluginResult<usize> {
        tokio::fs::create_dir_all(&self.options.base_dir).await?;

        let strategies = self.strategies.read().clone();
        let mut loaded = 0;
        for manifest in strategies.list_all(InfoOptions::local()).await {
            let outcome = self.lifecycle.load(&manifest.path).await;
            if outcome.is_ok() {
                loaded += 1;
            } else {
                warn!(
                    path = %manifest.path.display(),
                    error = %outcome.message(),
                    "Installed plugin not loaded"
                );
            }
        }

        self.bind_channels().await;
        info!(loaded, base = %self.options.base_dir.display(), "Plugin manager ready");
        Ok(loaded)
    }

    async fn bind_channels(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let install = move |_event: HandlerEvent, args: Vec<Value>| {
            let manager = Weak::clone(&weak);
            async move {
                let Some(manager) = manager.upgrade() else {
                    return Value::Null;
                };
                let source = args.first().and_then(Value::as_str).unwrap_or_default();
                let name = args.get(1).and_then(Value::as_str);
                manager.install(source, name).await.to_value()
            }
        };

        let weak = Arc::downgrade(self);
        let uninstall = move |_event: HandlerEvent, args: Vec<Value>| {
            let manager = Weak::clone(&weak);
            async move {
                let Some(manager) = manager.upgrade() else {
                    return Value::Null;
                };
                let name = args.first().and_then(Value::as_str).unwrap_or_default();
                manager.uninstall(name).await.to_value()
            }
        };

        let weak = Arc::downgrade(self);
        let call = move |_event: HandlerEvent, args: Vec<Value>| {
            let manager = Weak::clone(&weak);
            async move {
                let Some(manager) = manager.upgrade() else {
                    return Value::Null;
                };
                let mut args = args.into_iter();
                let export = args.next().and_then(|v| v.as_str().map(str::to_string));
                let call_args = match args.next() {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other],
                };
                let options = args
                    .next()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                match export {
                    Some(export) => Value::Array(manager.call(&export, call_args, options).await),
                    None => Value::Null,
                }
            }
        };

        let router = self.router();
        let handles = [
            router.handle(INSTALL_CHANNEL, install).await,
            router.handle(UNINSTALL_CHANNEL, uninstall).await,
            router.handle(CALL_CHANNEL, call).await,
        ];
        let mut bindings = self.bindings.lock();
        for handle in handles {
            match handle {
                Some(handle) => bindings.push(handle),
                None => error!("Plugin channel could not be bound"),
            }
        }
    }

    /// Unbinds the plugin channels and unloads every plugin.
    pub async fn shutdown(&self) {
        let bindings: Vec<BindingHandle> = self.bindings.lock().drain(..).collect();
        for handle in bindings {
            self.router().off(&handle.channel, handle.binding.id).await;
        }
        self.lifecycle.unload_all().await;
        info!("Plugin manager stopped");
    }

    // ─── Operations ──────────────────────────────────────────────────────────

    /// Installs and loads the plugin at `source`.
    ///
    /// When `name` is given and that plugin is loaded, it is removed first.
    /// A plugin already loaded under the installed manifest's name is
    /// replaced.
    pub async fn install(&self, source: &str, name: Option<&str>) -> Outcome<bool> {
        match detect_source(source) {
            Ok(detected) => self.install_detected(source, detected, name).await,
            Err(e) => {
                warn!(source = %source, error = %e, "Plugin install failed");
                e.into()
            }
        }
    }

    async fn install_detected(
        &self,
        source: &str,
        detected: DetectedSource,
        name: Option<&str>,
    ) -> Outcome<bool> {
        match self.try_install(source, detected, name).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(source = %source, error = %e, "Plugin install failed");
                e.into()
            }
        }
    }

    async fn try_install(
        &self,
        source: &str,
        detected: DetectedSource,
        name: Option<&str>,
    ) -> PluginResult<Outcome<bool>> {
        let strategy = self
            .strategy(&detected.strategy)
            .ok_or_else(|| PluginError::NoStrategy(detected.strategy.clone()))?;

        let _guard = self.lock_install(source)?;

        if let Some(name) = name {
            if self.lifecycle.contains(name).await {
                let removed = self.uninstall(name).await;
                if !removed.is_ok() {
                    return Ok(removed);
                }
            }
        }

        let installed = strategy.install(&detected.uri).await;
        let Some(result) = installed.data().cloned() else {
            return Ok(installed.cast());
        };
        let dir = result.path;

        let manifest =
            crate::plugin::read_manifest_lenient(&dir, self.lifecycle.manifest_file()).await;
        let debug_in_place = manifest.as_ref().is_some_and(|config| config.debug);
        if let Some(config) = &manifest {
            if self.lifecycle.contains(&config.name).await {
                info!(plugin = %config.name, "Replacing loaded plugin");
                self.lifecycle.unload(&config.name).await;
            }
        }

        if !debug_in_place {
            UpdateRecord::new(source, detected.kind).write(&dir).await?;
        }
        Ok(self.lifecycle.load(&dir).await)
    }

    fn lock_install(&self, key: &str) -> PluginResult<InstallGuard<'_>> {
        if !self.installing.lock().insert(key.to_string()) {
            return Err(PluginError::InstallInProgress(key.to_string()));
        }
        Ok(InstallGuard {
            installing: &self.installing,
            key: key.to_string(),
        })
    }

    /// Unloads plugin `name` and removes its files through the strategy
    /// recorded at install time. Plugins without a record stay on disk.
    pub async fn uninstall(&self, name: &str) -> Outcome<bool> {
        let Some(lifecycle) = self.lifecycle.get(name).await else {
            return PluginError::NotFound(name.to_string()).into();
        };
        let dir = lifecycle.path().to_path_buf();
        drop(lifecycle);

        let record = UpdateRecord::read(&dir).await;
        let unloaded = self.lifecycle.unload(name).await;
        if !unloaded.is_ok() {
            return unloaded;
        }

        let Some(record) = record else {
            debug!(plugin = %name, path = %dir.display(), "No update record, files left in place");
            return Outcome::ok(true);
        };
        let recorded = recorded_source(&record);
        // A local source may be gone; the managed copy is what gets removed.
        let uri = match recorded.kind {
            SourceKind::Local => dir.to_string_lossy().into_owned(),
            _ => recorded.uri.clone(),
        };
        let removed = match self.strategy(&recorded.strategy) {
            Some(strategy) => strategy.uninstall(&uri).await,
            None => PluginError::NoStrategy(recorded.strategy).into(),
        };
        if removed.is_ok() {
            info!(plugin = %name, "Plugin uninstalled");
            Outcome::ok(true)
        } else {
            warn!(plugin = %name, error = %removed.message(), "Plugin files not removed");
            removed.cast()
        }
    }

    /// Runs `export` on the loaded plugins.
    pub async fn call(
        &self,
        export: &str,
        args: Vec<Value>,
        options: PluginCallOptions,
    ) -> Vec<Value> {
        self.lifecycle.call(export, args, options).await
    }

    /// Manifests of the loaded plugins.
    pub async fn list(&self) -> Vec<Manifest> {
        self.lifecycle.list().await
    }

    /// Replaces every loaded plugin whose remote version is newer.
    pub async fn update(&self) -> UpdateReport {
        let mut report = UpdateReport::default();
        for manifest in self.lifecycle.list().await {
            let name = manifest.config.name.clone();
            match self.update_one(&manifest).await {
                Ok(true) => report.updated.push(name),
                Ok(false) => report.up_to_date.push(name),
                Err(e) => {
                    debug!(plugin = %name, error = %e, "Plugin skipped by update");
                    report.skipped.push(name);
                }
            }
        }
        info!(
            updated = report.updated.len(),
            up_to_date = report.up_to_date.len(),
            skipped = report.skipped.len(),
            "Plugin update finished"
        );
        report
    }

    async fn update_one(&self, manifest: &Manifest) -> PluginResult<bool> {
        let name = manifest.config.name.as_str();
        let record = UpdateRecord::read(&manifest.path)
            .await
            .ok_or_else(|| PluginError::Io(format!("no update record for {name}")))?;
        let recorded = recorded_source(&record);
        let strategy = self
            .strategy(&recorded.strategy)
            .ok_or_else(|| PluginError::NoStrategy(recorded.strategy.clone()))?;
        let remote = strategy
            .info(&recorded.uri, InfoOptions::remote())
            .await
            .ok_or_else(|| PluginError::Io(format!("no remote info for {name}")))?;

        let local = Version::parse(manifest.config.version.trim())
            .map_err(|_| PluginError::InvalidVersion(name.to_string()))?;
        let latest =
            Version::parse(remote.config.version.trim()).unwrap_or_else(|_| Version::new(0, 0, 0));
        if local >= latest {
            return Ok(false);
        }

        info!(plugin = %name, from = %local, to = %latest, "Updating plugin");
        let router = self.router().clone();
        let notice = vec![Value::String(name.to_string())];
        tokio::spawn(async move {
            router
                .invoke(UPDATE_CHANNEL, notice, InvokeOptions::new())
                .await;
        });

        let removed = self.uninstall(name).await;
        if !removed.is_ok() {
            return Err(PluginError::Io(removed.message().to_string()));
        }
        let installed = self.install_detected(&record.url, recorded, None).await;
        if !installed.is_ok() {
            return Err(PluginError::Io(installed.message().to_string()));
        }
        Ok(true)
    }
}
