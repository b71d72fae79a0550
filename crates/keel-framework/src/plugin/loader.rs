//! Script evaluation and caching.
//!
//! A [`ModuleSource`] turns a script path into [`PluginExports`]. The shipped
//! [`ModuleRegistry`] maps script identifiers to module constructors. A
//! [`ScriptLoader`] decides when evaluation happens: [`CachedLoader`] keeps
//! the first table, [`ReloadLoader`] builds a fresh one for every call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::exports::{ExportTable, HostContext, PluginExports};
use crate::error::{PluginError, PluginResult};

/// Resolves a script path to a module entry point.
pub trait ModuleSource: Send + Sync {
    /// Evaluates `script`, returning `None` if no module backs it.
    fn evaluate(&self, script: &Path) -> Option<PluginExports>;
}

type ModuleCtor = Arc<dyn Fn() -> PluginExports + Send + Sync>;

/// In-process module table keyed by script identifier.
///
/// A script matches an identifier when the path ends with the identifier's
/// components, so `demo/index.js` matches `/plugins/local/demo/index.js`.
/// Every evaluation runs the constructor again.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<Vec<(PathBuf, ModuleCtor)>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module; a later registration of the same identifier wins.
    pub fn register<F>(&self, id: impl Into<PathBuf>, ctor: F)
    where
        F: Fn() -> PluginExports + Send + Sync + 'static,
    {
        let id = id.into();
        let mut modules = self.modules.write();
        modules.retain(|(existing, _)| existing != &id);
        debug!(module = %id.display(), "Module registered");
        modules.push((id, Arc::new(ctor)));
    }

    pub fn unregister(&self, id: impl AsRef<Path>) -> bool {
        let mut modules = self.modules.write();
        let before = modules.len();
        modules.retain(|(existing, _)| existing != id.as_ref());
        modules.len() != before
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ModuleSource for ModuleRegistry {
    fn evaluate(&self, script: &Path) -> Option<PluginExports> {
        let ctor = self
            .modules
            .read()
            .iter()
            .rev()
            .find(|(id, _)| script.ends_with(id))
            .map(|(_, ctor)| Arc::clone(ctor))?;
        trace!(script = %script.display(), "Evaluating module");
        Some(ctor())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<PathBuf> = self.modules.read().iter().map(|(id, _)| id.clone()).collect();
        f.debug_struct("ModuleRegistry").field("modules", &ids).finish()
    }
}

// =============================================================================
// Loaders
// =============================================================================

/// Owns a plugin's evaluated export table.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    /// The table to call into, evaluating the script when needed.
    async fn load(&self) -> PluginResult<ExportTable>;

    /// The table from the last evaluation, if any.
    fn current(&self) -> Option<ExportTable>;

    /// Drops the cached table and returns it.
    fn discard(&self) -> Option<ExportTable>;
}

/// State shared by both loaders.
struct ScriptCell {
    script: PathBuf,
    source: Arc<dyn ModuleSource>,
    ctx: HostContext,
    table: Mutex<Option<ExportTable>>,
}

impl ScriptCell {
    fn new(script: PathBuf, source: Arc<dyn ModuleSource>, ctx: HostContext) -> Self {
        Self {
            script,
            source,
            ctx,
            table: Mutex::new(None),
        }
    }

    async fn evaluate(&self) -> PluginResult<ExportTable> {
        let exports = self
            .source
            .evaluate(&self.script)
            .ok_or_else(|| PluginError::ModuleNotFound(self.script.display().to_string()))?;
        let table = exports
            .materialize(self.ctx.clone())
            .await
            .map_err(PluginError::export)?;
        *self.table.lock() = Some(table.clone());
        Ok(table)
    }
}

/// Evaluates once and reuses the table.
pub struct CachedLoader {
    cell: ScriptCell,
}

impl CachedLoader {
    pub fn new(script: PathBuf, source: Arc<dyn ModuleSource>, ctx: HostContext) -> Self {
        Self {
            cell: ScriptCell::new(script, source, ctx),
        }
    }
}

#[async_trait]
impl ScriptLoader for CachedLoader {
    async fn load(&self) -> PluginResult<ExportTable> {
        if let Some(table) = self.current() {
            return Ok(table);
        }
        self.cell.evaluate().await
    }

    fn current(&self) -> Option<ExportTable> {
        self.cell.table.lock().clone()
    }

    fn discard(&self) -> Option<ExportTable> {
        self.cell.table.lock().take()
    }
}

/// Discards the cached module and re-evaluates on every load.
pub struct ReloadLoader {
    cell: ScriptCell,
}

impl ReloadLoader {
    pub fn new(script: PathBuf, source: Arc<dyn ModuleSource>, ctx: HostContext) -> Self {
        Self {
            cell: ScriptCell::new(script, source, ctx),
        }
    }
}

#[async_trait]
impl ScriptLoader for ReloadLoader {
    async fn load(&self) -> PluginResult<ExportTable> {
        self.discard();
        trace!(script = %self.cell.script.display(), "Reloading module");
        self.cell.evaluate().await
    }

    fn current(&self) -> Option<ExportTable> {
        self.cell.table.lock().clone()
    }

    fn discard(&self) -> Option<ExportTable> {
        self.cell.table.lock().take()
    }
}

/// Picks the loader for a plugin: [`ReloadLoader`] when `hot`, otherwise
/// [`CachedLoader`].
pub fn loader_for(
    hot: bool,
    script: PathBuf,
    source: Arc<dyn ModuleSource>,
    ctx: HostContext,
) -> Box<dyn ScriptLoader> {
    if hot {
        Box::new(ReloadLoader::new(script, source, ctx))
    } else {
        Box::new(CachedLoader::new(script, source, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::PluginConfig;
    use keel_core::{Bus, IpcRouter};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> HostContext {
        let router = IpcRouter::main(Arc::new(Bus::new()));
        HostContext {
            process: router.process().clone(),
            router,
            path: PathBuf::from("/plugins/demo"),
            config: PluginConfig::new("demo", "1.0.0"),
        }
    }

    fn counting_registry(counter: Arc<AtomicUsize>) -> Arc<ModuleRegistry> {
        let registry = ModuleRegistry::new();
        registry.register("demo/index.js", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            ExportTable::new()
                .with("generation", move |_| async move { Ok(json!(n)) })
                .into()
        });
        Arc::new(registry)
    }

    #[test]
    fn test_registry_matches_path_suffix_by_component() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        assert!(registry.evaluate(Path::new("/base/local/demo/index.js")).is_some());
        assert!(registry.evaluate(Path::new("/base/local/xdemo/index.js")).is_none());
        assert!(registry.evaluate(Path::new("/base/local/demo/other.js")).is_none());
    }

    #[test]
    fn test_later_registration_replaces() {
        let registry = ModuleRegistry::new();
        registry.register("a.js", || ExportTable::new().into());
        registry.register("a.js", || ExportTable::new().into());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("a.js"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cached_loader_evaluates_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let loader = CachedLoader::new(
            PathBuf::from("/p/demo/index.js"),
            counting_registry(counter.clone()),
            context(),
        );
        loader.load().await.unwrap();
        loader.load().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(loader.discard().is_some());
        assert!(loader.current().is_none());
    }

    #[tokio::test]
    async fn test_reload_loader_builds_fresh_instances() {
        let counter = Arc::new(AtomicUsize::new(0));
        let loader = loader_for(
            true,
            PathBuf::from("/p/demo/index.js"),
            counting_registry(counter.clone()),
            context(),
        );
        for expected in 1..=3 {
            let table = loader.load().await.unwrap();
            let generation = table.get("generation").unwrap();
            assert_eq!(generation(vec![]).await.unwrap(), json!(expected));
        }
    }

    #[tokio::test]
    async fn test_unknown_script() {
        let loader = CachedLoader::new(
            PathBuf::from("/p/ghost/index.js"),
            Arc::new(ModuleRegistry::new()),
            context(),
        );
        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, PluginError::ModuleNotFound(_)));
    }
}
