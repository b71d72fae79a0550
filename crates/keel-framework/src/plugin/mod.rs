//! Plugin model.
//!
//! # Architecture
//!
//! A plugin is a directory holding a `plugin.json` manifest and the script(s)
//! it names. Loading a plugin produces a [`Lifecycle`]:
//!
//! - the manifest is parsed into a [`PluginConfig`] and validated;
//! - the script for the current process role is resolved (a `{main,
//!   renderer}` pair leaves the other role inert);
//! - a [`ModuleSource`] evaluates the script to [`PluginExports`], which are
//!   normalized into an [`ExportTable`];
//! - a [`ScriptLoader`] caches the table, or re-evaluates it per call for
//!   `hot` plugins.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use keel_framework::plugin::{ExportTable, ModuleRegistry};
//!
//! let modules = ModuleRegistry::new();
//! modules.register("demo/index.js", || {
//!     ExportTable::new()
//!         .with("getVersion", |_args| async { Ok(json!("1.0.0")) })
//!         .into()
//! });
//! ```
//!
//! ```json
//! { "name": "demo", "version": "1.0.0", "script": "index.js" }
//! ```

pub mod exports;
pub mod lifecycle;
pub mod loader;
pub mod manifest;

pub use exports::{DESTROY_EXPORT, ExportError, ExportFn, ExportTable, HostContext, PluginExports};
pub use lifecycle::{Lifecycle, LifecycleStatus};
pub use loader::{
    CachedLoader, ModuleRegistry, ModuleSource, ReloadLoader, ScriptLoader, loader_for,
};
pub use manifest::{
    DEFAULT_MANIFEST_FILE, Manifest, PluginCallOptions, PluginConfig, REQUIRED_FIELDS, ScriptPath,
    SourceKind, UPDATE_FILE, UpdateRecord, is_valid_name, read_manifest, read_manifest_lenient,
    write_manifest,
};
