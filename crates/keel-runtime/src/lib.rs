//! Keel Runtime - configuration, logging and process hosting.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `KeelConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - In-process endpoints on a shared bus (`ProcessHost`, `Context`)
//! - The top-level runtime owning the plugin manager (`KeelRuntime`)
//!
//! ```rust,ignore
//! use keel_runtime::KeelRuntime;
//!
//! #[tokio::main]
//! async fn main() -> keel_runtime::RuntimeResult<()> {
//!     let runtime = KeelRuntime::builder().build()?;
//!     let window = runtime.spawn("window")?;
//!
//!     runtime.start().await?;
//!     let versions = window
//!         .plugins()
//!         .call("getVersion", vec![], Default::default())
//!         .await;
//!     tracing::info!(?versions, "Plugin versions");
//!     runtime.stop().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, KeelConfig};
pub use context::Context;
pub use error::{RuntimeError, RuntimeResult};
pub use host::{HostStats, ProcessHost};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{KeelRuntime, RuntimeBuilder, source_options};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and the types most applications touch.
pub mod prelude {
    pub use super::{Context, KeelRuntime};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
