//! Request/response routing between processes.
//!
//! # Overview
//!
//! Every process owns one [`IpcRouter`]. The router of the main process also
//! owns the authoritative [`BindingRegistry`]; renderer routers consult it
//! through the housekeeping channels.
//!
//! | Caller / target | Strategy |
//! |-----------------|----------|
//! | same process | The handler is called in place, no serialization. |
//! | different process | A [`Frame::Request`] tagged with a correlation id is sent to the target; the answer comes back as a [`Frame::Reply`] on `r-<channel>` and is routed to the waiting future. |
//!
//! Progress notifications travel the same way on `r-cb-<channel>`.
//!
//! A fan-out [`invoke`](IpcRouter::invoke) never fails. Targets that do not
//! answer before the deadline are left out of the result set and their late
//! replies are dropped.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::binding::{
    BindingHandle, BindingInfo, BoxedHandler, Handler, HandlerEvent, ProgressFn,
};
use super::frame::{
    ADD_IPC, CLEAR_IPC, CorrelationId, Frame, GET_IPC, InvokeRequest, REMOVE_IPC,
    parse_reply_channel, reply_channel,
};
use super::registry::{BindingMap, BindingRegistry};
use super::result::{InvokeItem, InvokeResultSet};
use super::transport::Transport;
use crate::error::{IpcError, IpcResult};
use crate::process::{MAIN_PROCESS_ID, ProcessHandle, ProcessId};

/// Default per-invoke deadline.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Returns `true` for channel names the router reserves for itself.
pub fn is_reserved_channel(channel: &str) -> bool {
    matches!(channel, GET_IPC | ADD_IPC | REMOVE_IPC | CLEAR_IPC)
        || parse_reply_channel(channel).is_some()
}

// =============================================================================
// InvokeOptions
// =============================================================================

/// Options for [`IpcRouter::invoke`].
#[derive(Clone, Default)]
pub struct InvokeOptions {
    /// Only call bindings whose process name is in this list.
    pub target_names: Option<Vec<String>>,
    /// Overrides the router's default deadline.
    pub timeout: Option<Duration>,
    /// Receives every `emit()` made by the targets.
    pub on_progress: Option<ProgressFn>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one process name to the target filter.
    pub fn target(mut self, name: impl Into<String>) -> Self {
        self.target_names
            .get_or_insert_with(Vec::new)
            .push(name.into());
        self
    }

    /// Replaces the target filter.
    pub fn targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn accepts(&self, binding: &BindingInfo) -> bool {
        match &self.target_names {
            None => true,
            Some(names) => binding
                .process_name()
                .is_some_and(|name| names.iter().any(|n| n == name)),
        }
    }
}

impl fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("target_names", &self.target_names)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

// =============================================================================
// Router internals
// =============================================================================

struct RouterInner {
    process: ProcessHandle,
    transport: Arc<dyn Transport>,
    /// Present only in the main process.
    registry: Option<Arc<BindingRegistry>>,
    /// This process's own handlers, one per channel.
    local: RwLock<HashMap<String, BoxedHandler>>,
    /// Outstanding cross-process calls: correlation id → reply slot.
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Value>>>,
    /// Progress listeners of outstanding calls.
    progress: Mutex<HashMap<CorrelationId, ProgressFn>>,
    timeout: RwLock<Duration>,
}

/// Removes a pending call's bookkeeping however the call ends.
struct PendingGuard {
    inner: Arc<RouterInner>,
    id: CorrelationId,
}

impl PendingGuard {
    fn register(
        inner: &Arc<RouterInner>,
        id: &CorrelationId,
        reply: oneshot::Sender<Value>,
        progress: Option<ProgressFn>,
    ) -> Self {
        inner.pending.lock().insert(id.clone(), reply);
        if let Some(progress) = progress {
            inner.progress.lock().insert(id.clone(), progress);
        }
        Self {
            inner: Arc::clone(inner),
            id: id.clone(),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
        self.inner.progress.lock().remove(&self.id);
    }
}

// =============================================================================
// IpcRouter
// =============================================================================

/// The per-process IPC endpoint. Cheap to clone.
#[derive(Clone)]
pub struct IpcRouter {
    inner: Arc<RouterInner>,
}

impl IpcRouter {
    /// Creates the router for `process`; a main-process router owns a fresh
    /// registry.
    pub fn new(process: ProcessHandle, transport: Arc<dyn Transport>) -> Self {
        let registry = process
            .is_main_process
            .then(|| Arc::new(BindingRegistry::new()));
        Self {
            inner: Arc::new(RouterInner {
                process,
                transport,
                registry,
                local: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                progress: Mutex::new(HashMap::new()),
                timeout: RwLock::new(DEFAULT_INVOKE_TIMEOUT),
            }),
        }
    }

    /// Router of the main process.
    pub fn main(transport: Arc<dyn Transport>) -> Self {
        Self::new(ProcessHandle::main(), transport)
    }

    /// Spawns the task that drains this process's inbound frame queue.
    ///
    /// The task ends when the queue's sender side is dropped.
    pub fn serve(&self, mut inbound: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(bytes) = inbound.recv().await {
                match Frame::decode(&bytes) {
                    Ok(frame) => router.on_frame(frame),
                    Err(e) => warn!(process = router.id(), error = %e, "Dropping malformed frame"),
                }
            }
            debug!(process = router.id(), "Inbound queue closed, router stopped");
        })
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.inner.process
    }

    pub fn id(&self) -> ProcessId {
        self.inner.process.id
    }

    pub fn is_main(&self) -> bool {
        self.inner.process.is_main_process
    }

    /// The authoritative registry; `None` outside the main process.
    pub fn registry(&self) -> Option<&Arc<BindingRegistry>> {
        self.inner.registry.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Sets the default `invoke` deadline.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.inner.timeout.write() = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.inner.timeout.read()
    }

    /// Channels this process currently answers.
    pub fn local_channels(&self) -> Vec<String> {
        let mut channels: Vec<_> = self.inner.local.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Number of cross-process calls still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Binds `handler` to `channel` for this process.
    ///
    /// Returns `None` if this process already answers `channel`, if the
    /// shared registry already holds a binding for this process, if the name
    /// is reserved, or if the main process could not be reached.
    pub async fn handle<H: Handler>(&self, channel: &str, handler: H) -> Option<BindingHandle> {
        self.handle_boxed(channel, Arc::new(handler)).await
    }

    /// Like [`handle`](Self::handle) for an already boxed handler.
    pub async fn handle_boxed(
        &self,
        channel: &str,
        handler: BoxedHandler,
    ) -> Option<BindingHandle> {
        if is_reserved_channel(channel) {
            error!(channel = %channel, "Refusing to bind a reserved IPC channel");
            return None;
        }

        let info = BindingInfo::new(channel, &self.inner.process);
        {
            let mut local = self.inner.local.write();
            if local.contains_key(channel) {
                error!(
                    channel = %channel,
                    process = self.id(),
                    "Duplicate IPC registration"
                );
                return None;
            }
            local.insert(channel.to_string(), handler);
        }

        match self.registry_add(&info).await {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    channel = %channel,
                    process = self.id(),
                    "Duplicate IPC registration in the shared registry, rolling back"
                );
                self.inner.local.write().remove(channel);
                return None;
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Could not publish IPC binding, rolling back");
                self.inner.local.write().remove(channel);
                return None;
            }
        }

        debug!(channel = %channel, process = self.id(), "IPC handler bound");
        Some(BindingHandle {
            channel: channel.to_string(),
            binding: info,
        })
    }

    /// Removes the binding of process `binding_id` on `channel`.
    ///
    /// Returns `true` if a local or shared entry was removed.
    pub async fn off(&self, channel: &str, binding_id: ProcessId) -> bool {
        let removed_local =
            binding_id == self.id() && self.inner.local.write().remove(channel).is_some();
        let removed_shared = match self.registry_remove(channel, binding_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Could not remove shared IPC binding");
                false
            }
        };
        removed_local || removed_shared
    }

    /// Drops bindings of a process.
    ///
    /// From the main process with `Some(id)` of another process, that
    /// process's shared entries are purged and it is told to drop its local
    /// handlers. Otherwise the caller's own bindings are dropped.
    pub async fn clear(&self, process: Option<ProcessId>) {
        match process {
            Some(target) if self.is_main() && target != self.id() => {
                if let Some(registry) = &self.inner.registry {
                    registry.remove_process(target);
                }
                let frame = Frame::Notify {
                    channel: CLEAR_IPC.to_string(),
                    sender: self.id(),
                };
                if let Err(e) = self.inner.transport.send_frame(target, &frame).await {
                    debug!(process = target, error = %e, "Clear notification not delivered");
                }
            }
            _ => self.clear_local().await,
        }
    }

    async fn clear_local(&self) {
        let channels: Vec<String> = self.inner.local.write().drain().map(|(k, _)| k).collect();
        for channel in &channels {
            if let Err(e) = self.registry_remove(channel, self.id()).await {
                debug!(channel = %channel, error = %e, "Shared binding not removed during clear");
            }
        }
        debug!(process = self.id(), count = channels.len(), "Local IPC bindings cleared");
    }

    // ─── Invocation ──────────────────────────────────────────────────────────

    /// Calls every binding on `channel` concurrently and gathers the answers
    /// in completion order.
    ///
    /// Resolves once all targets answered or the deadline passed, whichever
    /// comes first. Never fails: lookup errors and unreachable targets yield
    /// an empty set or `null` results.
    pub async fn invoke(
        &self,
        channel: &str,
        args: Vec<Value>,
        options: InvokeOptions,
    ) -> InvokeResultSet {
        let timeout = options.timeout.unwrap_or_else(|| self.timeout());
        let deadline = Instant::now() + timeout;

        let bindings = match tokio::time::timeout_at(deadline, self.lookup(channel)).await {
            Ok(Ok(bindings)) => bindings,
            Ok(Err(e)) => {
                warn!(channel = %channel, error = %e, "IPC binding lookup failed");
                return InvokeResultSet::default();
            }
            Err(_) => {
                warn!(channel = %channel, "IPC binding lookup timed out");
                return InvokeResultSet::default();
            }
        };

        let targets: Vec<BindingInfo> = bindings
            .into_iter()
            .filter(|binding| options.accepts(binding))
            .collect();
        if targets.is_empty() {
            trace!(channel = %channel, "No IPC bindings to invoke");
            return InvokeResultSet::default();
        }

        let mut calls: FuturesUnordered<_> = targets
            .into_iter()
            .map(|binding| {
                let router = self.clone();
                let args = args.clone();
                let progress = options.on_progress.clone();
                let channel = channel.to_string();
                async move {
                    let started = Instant::now();
                    let result = router.invoke_one(&channel, &binding, args, progress).await;
                    InvokeItem {
                        binding,
                        result,
                        time: started.elapsed(),
                    }
                }
            })
            .collect();

        let mut items = Vec::with_capacity(calls.len());
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                next = calls.next() => match next {
                    Some(item) => items.push(item),
                    None => break,
                },
                _ = &mut expired => {
                    debug!(
                        channel = %channel,
                        answered = items.len(),
                        missing = calls.len(),
                        "IPC invoke deadline reached"
                    );
                    break;
                }
            }
        }

        InvokeResultSet::new(items)
    }

    async fn invoke_one(
        &self,
        channel: &str,
        binding: &BindingInfo,
        args: Vec<Value>,
        progress: Option<ProgressFn>,
    ) -> Value {
        if binding.id == self.id() {
            let handler = self
                .inner
                .local
                .read()
                .get(channel)
                .cloned();
            return match handler {
                Some(handler) => {
                    let event = HandlerEvent::direct(channel, self.id(), progress);
                    run_handler(channel, handler, event, args).await
                }
                None => Value::Null,
            };
        }

        match self.call_remote(binding.id, channel, args, progress).await {
            Ok(value) => value,
            Err(e) => {
                debug!(channel = %channel, target = binding.id, error = %e, "IPC call failed");
                Value::Null
            }
        }
    }

    /// Sends one request to `target` and waits for its reply, without a deadline.
    async fn call_remote(
        &self,
        target: ProcessId,
        channel: &str,
        args: Vec<Value>,
        progress: Option<ProgressFn>,
    ) -> IpcResult<Value> {
        let request = InvokeRequest::new(self.is_main());

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::register(&self.inner, &request.id, tx, progress);

        let frame = Frame::Request {
            channel: channel.to_string(),
            sender: self.id(),
            request,
            args,
        };
        self.inner.transport.send_frame(target, &frame).await?;

        rx.await.map_err(|_| IpcError::Closed)
    }

    // ─── Registry access ─────────────────────────────────────────────────────

    async fn request_main(&self, channel: &str, args: Vec<Value>) -> IpcResult<Value> {
        tokio::time::timeout(
            self.timeout(),
            self.call_remote(MAIN_PROCESS_ID, channel, args, None),
        )
        .await
        .map_err(|_| IpcError::timeout(channel))?
    }

    /// Every live binding on `channel`, in registration order.
    pub async fn lookup(&self, channel: &str) -> IpcResult<Vec<BindingInfo>> {
        Ok(self
            .bindings()
            .await?
            .remove(channel)
            .unwrap_or_default())
    }

    /// A copy of the whole binding table.
    pub async fn bindings(&self) -> IpcResult<BindingMap> {
        if let Some(registry) = &self.inner.registry {
            return Ok(registry.snapshot());
        }
        let value = self.request_main(GET_IPC, Vec::new()).await?;
        if value.is_null() {
            return Ok(BindingMap::new());
        }
        serde_json::from_value(value).map_err(|e| IpcError::Decode(e.to_string()))
    }

    async fn registry_add(&self, info: &BindingInfo) -> IpcResult<bool> {
        if let Some(registry) = &self.inner.registry {
            return Ok(registry.add(info.clone()));
        }
        let arg = serde_json::to_value(info).map_err(|e| IpcError::Encode(e.to_string()))?;
        let value = self.request_main(ADD_IPC, vec![arg]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn registry_remove(&self, channel: &str, id: ProcessId) -> IpcResult<bool> {
        if let Some(registry) = &self.inner.registry {
            return Ok(registry.remove(channel, id));
        }
        let value = self
            .request_main(REMOVE_IPC, vec![json!(channel), json!(id)])
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    // ─── Inbound frames ──────────────────────────────────────────────────────

    fn on_frame(&self, frame: Frame) {
        match frame {
            Frame::Request {
                channel,
                sender,
                request,
                args,
            } => {
                let router = self.clone();
                tokio::spawn(async move {
                    router.on_request(channel, sender, request, args).await;
                });
            }
            Frame::Reply {
                channel,
                id,
                result,
            } => self.on_reply(&channel, id, result),
            Frame::Notify { channel, sender } if channel == CLEAR_IPC => {
                debug!(process = self.id(), from = sender, "Clear requested");
                let router = self.clone();
                tokio::spawn(async move { router.clear_local().await });
            }
            Frame::Notify { channel, .. } => {
                debug!(channel = %channel, "Ignoring unknown notification");
            }
        }
    }

    async fn on_request(
        &self,
        channel: String,
        sender: ProcessId,
        request: InvokeRequest,
        args: Vec<Value>,
    ) {
        let result = match channel.as_str() {
            GET_IPC | ADD_IPC | REMOVE_IPC => self.on_housekeeping(&channel, args),
            _ => {
                let handler = self
                    .inner
                    .local
                    .read()
                    .get(&channel)
                    .cloned();
                match handler {
                    Some(handler) => {
                        let event = HandlerEvent::remote(
                            &channel,
                            sender,
                            Arc::clone(&self.inner.transport),
                            request.id.clone(),
                        );
                        run_handler(&channel, handler, event, args).await
                    }
                    None => {
                        debug!(
                            channel = %channel,
                            process = self.id(),
                            "No local handler for request"
                        );
                        Value::Null
                    }
                }
            }
        };

        let reply = Frame::Reply {
            channel: reply_channel(&channel),
            id: request.id,
            result,
        };
        if let Err(e) = self.inner.transport.send_frame(sender, &reply).await {
            debug!(channel = %channel, to = sender, error = %e, "Reply not delivered");
        }
    }

    fn on_housekeeping(&self, channel: &str, args: Vec<Value>) -> Value {
        let Some(registry) = &self.inner.registry else {
            warn!(channel = %channel, "Registry request reached a non-main process");
            return Value::Null;
        };
        match channel {
            GET_IPC => serde_json::to_value(registry.snapshot()).unwrap_or(Value::Null),
            ADD_IPC => {
                let info = args
                    .into_iter()
                    .next()
                    .and_then(|value| serde_json::from_value::<BindingInfo>(value).ok());
                match info {
                    Some(info) => Value::Bool(registry.add(info)),
                    None => {
                        warn!("Malformed add-ipc request");
                        Value::Bool(false)
                    }
                }
            }
            REMOVE_IPC => {
                let name = args.first().and_then(Value::as_str);
                let id = args.get(1).and_then(Value::as_i64);
                match (name, id) {
                    (Some(name), Some(id)) => Value::Bool(registry.remove(name, id)),
                    _ => {
                        warn!("Malformed remove-ipc request");
                        Value::Bool(false)
                    }
                }
            }
            _ => Value::Null,
        }
    }

    fn on_reply(&self, channel: &str, id: CorrelationId, result: Value) {
        match parse_reply_channel(channel) {
            Some((_, true)) => {
                let progress = self.inner.progress.lock().get(&id).cloned();
                if let Some(progress) = progress {
                    progress(result);
                }
            }
            Some((origin, false)) => {
                let slot = self.inner.pending.lock().remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!(
                            channel = %origin,
                            id = %id,
                            "Reply for unknown request (timed out?)"
                        );
                    }
                }
            }
            None => debug!(channel = %channel, "Ignoring reply on a non-reply channel"),
        }
    }
}

impl fmt::Debug for IpcRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcRouter")
            .field("process", &self.inner.process)
            .field("channels", &self.local_channels())
            .finish_non_exhaustive()
    }
}

/// Runs a handler, turning a panic into a `null` result.
async fn run_handler(
    channel: &str,
    handler: BoxedHandler,
    event: HandlerEvent,
    args: Vec<Value>,
) -> Value {
    match AssertUnwindSafe(handler.call(event, args)).catch_unwind().await {
        Ok(value) => value,
        Err(_) => {
            error!(channel = %channel, "IPC handler panicked");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport::Bus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Net {
        bus: Arc<Bus>,
        main: IpcRouter,
    }

    impl Net {
        fn new() -> Self {
            let bus = Arc::new(Bus::new());
            let main = IpcRouter::main(bus.clone());
            main.serve(bus.attach(MAIN_PROCESS_ID));
            Self { bus, main }
        }

        fn renderer(&self, id: ProcessId, name: &str) -> IpcRouter {
            let router = IpcRouter::new(ProcessHandle::renderer(id, name), self.bus.clone());
            router.serve(self.bus.attach(id));
            router
        }
    }

    fn constant(value: Value) -> impl Handler {
        move |_event: HandlerEvent, _args: Vec<Value>| {
            let value = value.clone();
            async move { value }
        }
    }

    #[tokio::test]
    async fn test_main_to_main_direct_call() {
        let net = Net::new();
        net.main
            .handle("sum", |_event: HandlerEvent, args: Vec<Value>| async move {
                json!(args.iter().filter_map(Value::as_i64).sum::<i64>())
            })
            .await
            .unwrap();

        let set = net
            .main
            .invoke("sum", vec![json!(2), json!(3)], InvokeOptions::new())
            .await;
        assert_eq!(set.len(), 1);
        assert_eq!(set.first().unwrap().result, json!(5));
    }

    #[tokio::test]
    async fn test_duplicate_handle_rejected() {
        let net = Net::new();
        assert!(net.main.handle("dup", constant(json!(1))).await.is_some());
        assert!(net.main.handle("dup", constant(json!(2))).await.is_none());
        assert_eq!(net.main.registry().unwrap().get("dup").len(), 1);
    }

    #[tokio::test]
    async fn test_shared_duplicate_rolls_back_local_binding() {
        let net = Net::new();
        let first = net.renderer(2, "editor");
        first.handle("title", constant(json!("one"))).await.unwrap();

        // A second endpoint claiming the same process id.
        let second = net.renderer(2, "editor");
        assert!(second.handle("title", constant(json!("two"))).await.is_none());
        assert!(second.local_channels().is_empty());
        assert_eq!(net.main.registry().unwrap().get("title").len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_channel_rejected() {
        let net = Net::new();
        assert!(net.main.handle(GET_IPC, constant(json!(1))).await.is_none());
        assert!(net.main.handle("r-x", constant(json!(1))).await.is_none());
    }

    #[tokio::test]
    async fn test_renderer_binding_reaches_main_registry() {
        let net = Net::new();
        let editor = net.renderer(2, "editor");
        let handle = editor.handle("title", constant(json!("doc"))).await.unwrap();
        assert_eq!(handle.binding.id, 2);

        let shared = net.main.registry().unwrap().get("title");
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].process_name(), Some("editor"));
        assert_eq!(editor.lookup("title").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_across_processes() {
        let net = Net::new();
        let a = net.renderer(1, "a");
        let b = net.renderer(2, "b");
        net.main.handle("who", constant(json!("main"))).await.unwrap();
        a.handle("who", constant(json!("a"))).await.unwrap();
        b.handle("who", constant(json!("b"))).await.unwrap();

        // Renderer -> everyone, including itself.
        let set = a.invoke("who", Vec::new(), InvokeOptions::new()).await;
        assert_eq!(set.len(), 3);
        assert_eq!(set.by_name("b").unwrap().result, json!("b"));
        assert_eq!(set.by_id(MAIN_PROCESS_ID).unwrap().result, json!("main"));
        assert_eq!(set.by_name("a").unwrap().result, json!("a"));
    }

    #[tokio::test]
    async fn test_target_name_filter() {
        let net = Net::new();
        let a = net.renderer(1, "a");
        a.handle("who", constant(json!("a"))).await.unwrap();
        net.main.handle("who", constant(json!("main"))).await.unwrap();

        let set = net
            .main
            .invoke("who", Vec::new(), InvokeOptions::new().target("a"))
            .await;
        assert_eq!(set.len(), 1);
        assert_eq!(set.first().unwrap().result, json!("a"));

        let none = net
            .main
            .invoke("who", Vec::new(), InvokeOptions::new().target("ghost"))
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_channel_is_empty() {
        let net = Net::new();
        let set = net.main.invoke("nothing", Vec::new(), InvokeOptions::new()).await;
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_answering_handler_times_out_empty() {
        let net = Net::new();
        net.main
            .handle("hang", |_event: HandlerEvent, _args: Vec<Value>| async move {
                futures::future::pending::<()>().await;
                Value::Null
            })
            .await
            .unwrap();

        let started = Instant::now();
        let set = net
            .main
            .invoke(
                "hang",
                Vec::new(),
                InvokeOptions::new().timeout(Duration::from_millis(200)),
            )
            .await;
        assert!(set.is_empty());
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_is_omitted() {
        let net = Net::new();
        let fast_a = net.renderer(1, "fast_a");
        let fast_b = net.renderer(2, "fast_b");
        let slow = net.renderer(3, "slow");
        fast_a.handle("job", constant(json!(1))).await.unwrap();
        fast_b.handle("job", constant(json!(2))).await.unwrap();
        slow.handle("job", |_event: HandlerEvent, _args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            json!(3)
        })
        .await
        .unwrap();

        let set = net
            .main
            .invoke(
                "job",
                Vec::new(),
                InvokeOptions::new().timeout(Duration::from_millis(500)),
            )
            .await;
        assert_eq!(set.len(), 2);
        assert!(set.by_name("slow").is_none());

        // The abandoned call leaves nothing behind.
        assert_eq!(net.main.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_forwarded_across_processes() {
        let net = Net::new();
        let worker = net.renderer(7, "worker");
        worker
            .handle("download", |event: HandlerEvent, _args: Vec<Value>| async move {
                for pct in [25, 50, 100] {
                    event.emit(json!(pct)).await;
                }
                json!("done")
            })
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let set = net
            .main
            .invoke(
                "download",
                Vec::new(),
                InvokeOptions::new().on_progress(move |v| sink.lock().push(v)),
            )
            .await;

        assert_eq!(set.one().unwrap().result, json!("done"));
        assert_eq!(*seen.lock(), vec![json!(25), json!(50), json!(100)]);
    }

    #[tokio::test]
    async fn test_progress_in_process() {
        let net = Net::new();
        net.main
            .handle("tick", |event: HandlerEvent, _args: Vec<Value>| async move {
                event.emit(json!("half")).await;
                json!("full")
            })
            .await
            .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        net.main
            .invoke(
                "tick",
                Vec::new(),
                InvokeOptions::new().on_progress(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_yields_null() {
        let net = Net::new();
        async fn explode() -> Value {
            panic!("handler failure")
        }

        let r = net.renderer(1, "r");
        r.handle("boom", |_event: HandlerEvent, _args: Vec<Value>| explode())
            .await
            .unwrap();

        let set = net.main.invoke("boom", Vec::new(), InvokeOptions::new()).await;
        assert_eq!(set.len(), 1);
        assert!(set.first().unwrap().result.is_null());
    }

    #[tokio::test]
    async fn test_off_removes_local_and_shared() {
        let net = Net::new();
        let r = net.renderer(1, "r");
        r.handle("x", constant(json!(1))).await.unwrap();

        assert!(r.off("x", 1).await);
        assert!(r.local_channels().is_empty());
        assert!(net.main.registry().unwrap().get("x").is_empty());
    }

    #[tokio::test]
    async fn test_main_clear_purges_other_process() {
        let net = Net::new();
        let r = net.renderer(4, "r");
        r.handle("a", constant(json!(1))).await.unwrap();
        r.handle("b", constant(json!(2))).await.unwrap();

        net.main.clear(Some(4)).await;
        assert!(net.main.registry().unwrap().is_empty());

        // The renderer drops its local handlers once the notification lands.
        for _ in 0..50 {
            if r.local_channels().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(r.local_channels().is_empty());
    }

    #[tokio::test]
    async fn test_clear_own_bindings() {
        let net = Net::new();
        net.main.handle("a", constant(json!(1))).await.unwrap();
        net.main.clear(None).await;
        assert!(net.main.local_channels().is_empty());
        assert!(net.main.registry().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detached_target_yields_null() {
        let net = Net::new();
        let r = net.renderer(5, "gone");
        r.handle("ping", constant(json!("pong"))).await.unwrap();
        net.bus.detach(5);

        let set = net.main.invoke("ping", Vec::new(), InvokeOptions::new()).await;
        assert_eq!(set.len(), 1);
        assert!(set.first().unwrap().result.is_null());
    }
}
