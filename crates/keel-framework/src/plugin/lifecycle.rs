//! One loaded plugin.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use keel_core::ProcessRole;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::exports::{DESTROY_EXPORT, HostContext};
use super::loader::{ModuleSource, ScriptLoader, loader_for};
use super::manifest::{Manifest, PluginConfig};
use crate::error::PluginResult;

/// Whether a loaded plugin takes part in calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Enable,
    Disable,
}

/// A loaded plugin: its manifest, resolved script and export table.
///
/// ```text
/// new() ──► mounted() ──► call()* ──► unmounted()
///                     enable()/disable() toggle participation
/// ```
pub struct Lifecycle {
    manifest: Manifest,
    /// Resolved script for this process role; `None` when inert.
    script: Option<PathBuf>,
    status: RwLock<LifecycleStatus>,
    loader: Option<Box<dyn ScriptLoader>>,
}

impl Lifecycle {
    pub fn new(
        manifest: Manifest,
        role: ProcessRole,
        source: Arc<dyn ModuleSource>,
        ctx: HostContext,
    ) -> Self {
        let script = match manifest.config.script.resolve(role) {
            "" => None,
            relative => Some(manifest.path.join(relative)),
        };
        let loader = script
            .clone()
            .map(|script| loader_for(manifest.config.hot, script, source, ctx));
        Self {
            manifest,
            script,
            status: RwLock::new(LifecycleStatus::Enable),
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.config.name
    }

    pub fn config(&self) -> &PluginConfig {
        &self.manifest.config
    }

    pub fn path(&self) -> &Path {
        &self.manifest.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    pub fn is_inert(&self) -> bool {
        self.loader.is_none()
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.status.read()
    }

    pub fn is_enabled(&self) -> bool {
        self.status() == LifecycleStatus::Enable
    }

    pub fn enable(&self) {
        *self.status.write() = LifecycleStatus::Enable;
    }

    pub fn disable(&self) {
        *self.status.write() = LifecycleStatus::Disable;
    }

    /// Evaluates the script so load-time failures surface immediately.
    pub async fn mounted(&self) -> PluginResult<()> {
        if let Some(loader) = &self.loader {
            loader.load().await?;
        }
        Ok(())
    }

    /// Awaits the `destroy` export, if any, and drops the export table.
    pub async fn unmounted(&self) {
        let Some(table) = self.loader.as_ref().and_then(|loader| loader.discard()) else {
            return;
        };
        if let Some(destroy) = table.get(DESTROY_EXPORT) {
            match AssertUnwindSafe(destroy(Vec::new())).catch_unwind().await {
                Ok(Ok(_)) => debug!(plugin = %self.name(), "Plugin destroyed"),
                Ok(Err(e)) => warn!(plugin = %self.name(), error = %e, "Plugin destroy failed"),
                Err(_) => error!(plugin = %self.name(), "Plugin destroy panicked"),
            }
        }
    }

    /// Runs export `name`.
    ///
    /// Yields `null` when the plugin is disabled or inert, when the export is
    /// missing, and when it fails or panics.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Value {
        if !self.is_enabled() {
            return Value::Null;
        }
        let Some(loader) = &self.loader else {
            return Value::Null;
        };

        let table = match loader.load().await {
            Ok(table) => table,
            Err(e) => {
                error!(
                    path = %self.path().display(),
                    name = %name,
                    args = ?args,
                    error = %e,
                    "Plugin script failed to load"
                );
                return Value::Null;
            }
        };
        let Some(export) = table.get(name) else {
            return Value::Null;
        };

        match AssertUnwindSafe(export(args.clone())).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                error!(
                    path = %self.path().display(),
                    name = %name,
                    args = ?args,
                    error = %e,
                    "Plugin export failed"
                );
                Value::Null
            }
            Err(_) => {
                error!(
                    path = %self.path().display(),
                    name = %name,
                    args = ?args,
                    "Plugin export panicked"
                );
                Value::Null
            }
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name())
            .field("path", &self.manifest.path)
            .field("script", &self.script)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::exports::{ExportError, ExportTable};
    use crate::plugin::loader::ModuleRegistry;
    use crate::plugin::manifest::ScriptPath;
    use keel_core::{Bus, IpcRouter};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn lifecycle(config: PluginConfig, registry: ModuleRegistry, role: ProcessRole) -> Lifecycle {
        let router = IpcRouter::main(Arc::new(Bus::new()));
        let path = PathBuf::from("/plugins").join(&config.name);
        let ctx = HostContext {
            process: router.process().clone(),
            router,
            path: path.clone(),
            config: config.clone(),
        };
        Lifecycle::new(Manifest { config, path }, role, Arc::new(registry), ctx)
    }

    async fn fails(_args: Vec<Value>) -> Result<Value, ExportError> {
        Err("bad input".into())
    }

    async fn explodes(_args: Vec<Value>) -> Result<Value, ExportError> {
        panic!("export failure")
    }

    fn demo_registry() -> ModuleRegistry {
        let registry = ModuleRegistry::new();
        registry.register("demo/index.js", || {
            ExportTable::new()
                .with("getVersion", |_| async { Ok(json!("1.0.0")) })
                .with("fails", fails)
                .with("explodes", explodes)
                .into()
        });
        registry
    }

    #[tokio::test]
    async fn test_call_results() {
        let life = lifecycle(
            PluginConfig::new("demo", "1.0.0").with_script("index.js"),
            demo_registry(),
            ProcessRole::Main,
        );
        life.mounted().await.unwrap();

        assert_eq!(life.call("getVersion", vec![]).await, json!("1.0.0"));
        assert_eq!(life.call("missing", vec![]).await, Value::Null);
        assert_eq!(life.call("fails", vec![json!(1)]).await, Value::Null);
        assert_eq!(life.call("explodes", vec![]).await, Value::Null);
    }

    #[tokio::test]
    async fn test_disabled_yields_null() {
        let life = lifecycle(
            PluginConfig::new("demo", "1.0.0").with_script("index.js"),
            demo_registry(),
            ProcessRole::Main,
        );
        life.mounted().await.unwrap();
        life.disable();
        assert_eq!(life.status(), LifecycleStatus::Disable);
        assert_eq!(life.call("getVersion", vec![]).await, Value::Null);
        life.enable();
        assert_eq!(life.call("getVersion", vec![]).await, json!("1.0.0"));
    }

    #[tokio::test]
    async fn test_other_role_is_inert() {
        let config = PluginConfig {
            script: ScriptPath::Split {
                main: "index.js".into(),
                renderer: String::new(),
            },
            ..PluginConfig::new("demo", "1.0.0")
        };
        let life = lifecycle(config, demo_registry(), ProcessRole::Renderer);
        assert!(life.is_inert());
        life.mounted().await.unwrap();
        assert_eq!(life.call("getVersion", vec![]).await, Value::Null);
    }

    #[tokio::test]
    async fn test_unmounted_awaits_destroy() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let flag = destroyed.clone();
        let registry = ModuleRegistry::new();
        registry.register("demo/index.js", move || {
            let flag = flag.clone();
            ExportTable::new()
                .with(DESTROY_EXPORT, move |_| {
                    let flag = flag.clone();
                    async move {
                        tokio::task::yield_now().await;
                        flag.store(true, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                })
                .into()
        });
        let life = lifecycle(
            PluginConfig::new("demo", "1.0.0").with_script("index.js"),
            registry,
            ProcessRole::Main,
        );
        life.mounted().await.unwrap();
        life.unmounted().await;
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mount_fails_without_module() {
        let life = lifecycle(
            PluginConfig::new("ghost", "1.0.0").with_script("index.js"),
            ModuleRegistry::new(),
            ProcessRole::Main,
        );
        assert!(life.mounted().await.is_err());
    }
}
