//! Channel bindings and the handler abstraction behind them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::frame::{CorrelationId, Frame};
use super::transport::Transport;
use crate::process::{ProcessHandle, ProcessId};

/// Callback that receives progress notifications emitted by a handler.
pub type ProgressFn = Arc<dyn Fn(Value) + Send + Sync>;

/// The routable description of one handler registration.
///
/// This is what the shared registry stores and what travels between
/// processes; the callback itself never leaves its owning process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingInfo {
    /// Process that owns the handler.
    pub id: ProcessId,
    /// Channel name.
    pub name: String,
    pub is_main: bool,
    /// Metadata of the owning process, when known.
    pub option: Option<ProcessHandle>,
}

impl BindingInfo {
    pub fn new(channel: impl Into<String>, process: &ProcessHandle) -> Self {
        Self {
            id: process.id,
            name: channel.into(),
            is_main: process.is_main_process,
            option: Some(process.clone()),
        }
    }

    /// Logical name of the owning process.
    pub fn process_name(&self) -> Option<&str> {
        self.option.as_ref().map(|handle| handle.name.as_str())
    }
}

/// Returned by a successful `handle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingHandle {
    pub channel: String,
    pub binding: BindingInfo,
}

// =============================================================================
// HandlerEvent
// =============================================================================

#[derive(Clone)]
enum Emitter {
    /// Same-process call: progress goes straight to the caller's callback.
    Direct(Option<ProgressFn>),
    /// Cross-process call: progress is framed back to the caller.
    Remote {
        transport: Arc<dyn Transport>,
        target: ProcessId,
        channel: String,
        id: CorrelationId,
    },
}

/// The event object handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerEvent {
    channel: String,
    sender: ProcessId,
    emitter: Emitter,
}

impl HandlerEvent {
    pub(crate) fn direct(
        channel: impl Into<String>,
        sender: ProcessId,
        progress: Option<ProgressFn>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender,
            emitter: Emitter::Direct(progress),
        }
    }

    pub(crate) fn remote(
        channel: impl Into<String>,
        sender: ProcessId,
        transport: Arc<dyn Transport>,
        id: CorrelationId,
    ) -> Self {
        let channel = channel.into();
        Self {
            emitter: Emitter::Remote {
                transport,
                target: sender,
                channel: super::frame::progress_channel(&channel),
                id,
            },
            channel,
            sender,
        }
    }

    /// Channel this invocation arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Process that issued the call.
    pub fn sender(&self) -> ProcessId {
        self.sender
    }

    /// Pushes a progress notification to the caller.
    ///
    /// Silently dropped when the caller registered no progress callback or
    /// is no longer reachable.
    pub async fn emit(&self, data: Value) {
        match &self.emitter {
            Emitter::Direct(Some(progress)) => progress(data),
            Emitter::Direct(None) => {}
            Emitter::Remote {
                transport,
                target,
                channel,
                id,
            } => {
                let frame = Frame::Reply {
                    channel: channel.clone(),
                    id: id.clone(),
                    result: data,
                };
                if let Err(e) = transport.send_frame(*target, &frame).await {
                    debug!(channel = %channel, error = %e, "Dropped progress notification");
                }
            }
        }
    }
}

impl fmt::Debug for HandlerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEvent")
            .field("channel", &self.channel)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Answers calls made on a channel.
///
/// Implemented for any `Fn(HandlerEvent, Vec<Value>) -> impl Future<Output = Value>`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, event: HandlerEvent, args: Vec<Value>) -> Value;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(HandlerEvent, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    async fn call(&self, event: HandlerEvent, args: Vec<Value>) -> Value {
        (self)(event, args).await
    }
}

/// Type-erased, shareable handler.
pub type BoxedHandler = Arc<dyn Handler>;
