//! # Keel
//!
//! A framework for multi-process applications with a main/renderer split:
//! cross-process request/response messaging plus a plugin system that
//! installs, loads, calls and updates extensions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  invoke   ┌───────────────────────────────┐
//! │  Renderer    │──────────▶│ Main process                  │
//! │  Context     │◀──────────│  IpcRouter + BindingRegistry  │
//! └──────────────┘  results  │  PluginManager                │
//!                            │   ├─ LifecycleManager         │──▶ plugin exports
//!                            │   └─ git / npm / local        │──▶ network, disk
//!                            └───────────────────────────────┘
//! ```
//!
//! - **Core** (`keel-core`): processes, frames, the router and pub/sub
//! - **Transport** (`keel-transport`): HTTP, mirrors, archives, commands
//! - **Framework** (`keel-framework`): manifests, lifecycles, strategies
//! - **Runtime** (`keel-runtime`): configuration, logging, process hosting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> keel::runtime::RuntimeResult<()> {
//!     let modules = ModuleRegistry::new();
//!     modules.register("hello/index.js", || {
//!         ExportTable::new()
//!             .with("greet", |_args| async { Ok(serde_json::json!("hi")) })
//!             .into()
//!     });
//!
//!     let runtime = KeelRuntime::builder().modules(Arc::new(modules)).build()?;
//!     runtime.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use keel_core as core;
pub use keel_framework as framework;
pub use keel_runtime as runtime;
pub use keel_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use keel::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use keel_runtime::{Context, KeelConfig, KeelRuntime};

    // IPC
    pub use keel_core::{
        HandlerEvent, InvokeOptions, InvokeResultSet, IpcRouter, Outcome, ProcessHandle,
    };

    // Plugins
    pub use keel_framework::{
        ExportTable, HostContext, ModuleRegistry, PluginCallOptions, PluginClient, PluginConfig,
        PluginExports, PluginManager,
    };

    // Logging
    pub use keel_runtime::tracing::{debug, error, info, trace, warn};
}
