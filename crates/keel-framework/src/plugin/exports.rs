//! Export tables and plugin entry points.
//!
//! A plugin module evaluates to [`PluginExports`]: either a ready
//! [`ExportTable`] or an async factory that builds one from a
//! [`HostContext`]. The lifecycle normalizes both forms at load time.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use keel_core::{BoxFuture, IpcRouter, ProcessHandle};
use serde_json::Value;

use super::manifest::PluginConfig;

/// Error type returned by exports and factories.
pub type ExportError = Box<dyn std::error::Error + Send + Sync>;

/// A type-erased async export.
pub type ExportFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, ExportError>> + Send + Sync>;

/// Export awaited by `unload` before a plugin is discarded.
pub const DESTROY_EXPORT: &str = "destroy";

// =============================================================================
// ExportTable
// =============================================================================

/// Named async functions exposed by a plugin.
#[derive(Clone, Default)]
pub struct ExportTable {
    exports: HashMap<String, ExportFn>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an export.
    ///
    /// ```rust,ignore
    /// let table = ExportTable::new()
    ///     .with("getVersion", |_args| async { Ok(json!("1.0.0")) });
    /// ```
    pub fn with<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExportError>> + Send + 'static,
    {
        self.insert(name, f);
        self
    }

    pub fn insert<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExportError>> + Send + 'static,
    {
        let f: ExportFn = Arc::new(move |args| Box::pin(f(args)));
        self.exports.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<ExportFn> {
        self.exports.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    /// Export names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTable")
            .field("exports", &self.names())
            .finish()
    }
}

// =============================================================================
// HostContext
// =============================================================================

/// What a plugin factory receives from its host.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Router of the hosting process.
    pub router: IpcRouter,
    pub process: ProcessHandle,
    /// Plugin directory.
    pub path: PathBuf,
    pub config: PluginConfig,
}

type FactoryFn =
    Arc<dyn Fn(HostContext) -> BoxFuture<'static, Result<ExportTable, ExportError>> + Send + Sync>;

/// A plugin module's entry point.
#[derive(Clone)]
pub enum PluginExports {
    /// The table itself.
    Direct(ExportTable),
    /// Builds the table once the host context is known.
    Factory(FactoryFn),
}

impl PluginExports {
    pub fn factory<F, Fut>(f: F) -> Self
    where
        F: Fn(HostContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExportTable, ExportError>> + Send + 'static,
    {
        Self::Factory(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Normalizes either form into a table.
    pub async fn materialize(self, ctx: HostContext) -> Result<ExportTable, ExportError> {
        match self {
            Self::Direct(table) => Ok(table),
            Self::Factory(factory) => factory(ctx).await,
        }
    }
}

impl From<ExportTable> for PluginExports {
    fn from(table: ExportTable) -> Self {
        Self::Direct(table)
    }
}

impl fmt::Debug for PluginExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(table) => f.debug_tuple("Direct").field(table).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}
