//! # Keel Core
//!
//! The IPC engine of the Keel application framework.
//!
//! A Keel application is a set of cooperating processes: exactly one *main*
//! process and any number of *renderer* processes. Each owns an
//! [`IpcRouter`] that lets any process bind handlers to named channels and
//! invoke every binding of a channel at once, wherever it lives.
//!
//! ## Building Blocks
//!
//! - **Processes**: identity and lookup ([`ProcessHandle`], [`ProcessTable`])
//! - **Frames**: the wire envelope between routers ([`Frame`])
//! - **Transport**: byte delivery by process id ([`Transport`], [`Bus`])
//! - **Registry**: the main process's channel table ([`BindingRegistry`])
//! - **Router**: registration, fan-out invoke and progress ([`IpcRouter`])
//! - **Pub/Sub**: topic notifications ([`IpcRouter::publish`], [`IpcRouter::subscribe`])
//! - **Outcome**: the `{status, message, data}` result envelope ([`Outcome`])
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────────┐  Request   ┌─────────────────┐
//! │   Renderer   │───────────▶│      Main       │
//! │  IpcRouter   │◀───────────│    IpcRouter    │
//! └──────────────┘  r-<ch>    │ BindingRegistry │
//!        ▲                    └─────────────────┘
//!        │ r-cb-<ch> (progress)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel_core::{Bus, HandlerEvent, InvokeOptions, IpcRouter, MAIN_PROCESS_ID};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(Bus::new());
//!     let router = IpcRouter::main(bus.clone());
//!     router.serve(bus.attach(MAIN_PROCESS_ID));
//!
//!     router
//!         .handle("ping", |_event: HandlerEvent, _args: Vec<Value>| async { json!("pong") })
//!         .await;
//!
//!     let answers = router.invoke("ping", vec![], InvokeOptions::new()).await;
//!     assert_eq!(answers.one().unwrap().result, json!("pong"));
//! }
//! ```

pub mod error;
pub mod ipc;
pub mod outcome;
pub mod process;

pub use error::{IpcError, IpcResult};
pub use ipc::{
    BindingHandle, BindingInfo, BindingMap, BindingRegistry, BoxedHandler, Bus, CorrelationId,
    DEFAULT_INVOKE_TIMEOUT, Frame, Handler, HandlerEvent, InvokeItem, InvokeOptions,
    InvokeRequest, InvokeResultSet, IpcRouter, ProgressFn, Subscription, TOPIC_PREFIX, Transport,
    is_empty_value, topic_channel,
};
pub use outcome::{Outcome, STATUS_ERROR, STATUS_OK};
pub use process::{
    MAIN_PROCESS_ID, MAIN_PROCESS_NAME, ProcessHandle, ProcessId, ProcessRole, ProcessTable,
};

/// Boxed future used by type-erased callbacks.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BoxFuture, HandlerEvent, InvokeOptions, InvokeResultSet, IpcRouter, MAIN_PROCESS_ID,
        Outcome, ProcessHandle, ProcessId,
    };
}
