//! The per-process context handed to application code.

use keel_core::{
    BindingHandle, Handler, InvokeOptions, InvokeResultSet, IpcRouter, ProcessHandle, ProcessId,
    Subscription,
};
use keel_framework::PluginClient;
use serde_json::Value;

/// What one process sees of the application: its router and the plugin
/// manager reachable through it.
#[derive(Clone)]
pub struct Context {
    router: IpcRouter,
}

impl Context {
    pub fn new(router: IpcRouter) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &IpcRouter {
        &self.router
    }

    pub fn process(&self) -> &ProcessHandle {
        self.router.process()
    }

    pub fn id(&self) -> ProcessId {
        self.router.id()
    }

    pub fn is_main(&self) -> bool {
        self.router.is_main()
    }

    /// Binds `handler` to `channel` for this process.
    pub async fn handle<H: Handler>(&self, channel: &str, handler: H) -> Option<BindingHandle> {
        self.router.handle(channel, handler).await
    }

    /// Invokes every binding of `channel` with the default deadline.
    pub async fn invoke(&self, channel: &str, args: Vec<Value>) -> InvokeResultSet {
        self.router.invoke(channel, args, InvokeOptions::new()).await
    }

    pub async fn publish(&self, topic: &str, args: Vec<Value>) -> InvokeResultSet {
        self.router.publish(topic, args).await
    }

    pub async fn subscribe<H: Handler>(&self, topic: &str, handler: H) -> Option<Subscription> {
        self.router.subscribe(topic, handler).await
    }

    /// Client for the plugin manager of the main or plugin-host process.
    pub fn plugins(&self) -> PluginClient {
        PluginClient::new(self.router.clone())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("process", self.process())
            .finish()
    }
}
