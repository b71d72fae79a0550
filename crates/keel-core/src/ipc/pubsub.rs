//! Named update notifications layered on the router.
//!
//! A topic is an ordinary channel carrying the [`TOPIC_PREFIX`]. Every
//! process may subscribe once per topic; publishing fans out to all
//! subscribers like any `invoke`.

use serde_json::Value;

use super::binding::{BindingHandle, Handler};
use super::result::InvokeResultSet;
use super::router::{InvokeOptions, IpcRouter};

/// Prefix that turns a topic name into a channel name.
pub const TOPIC_PREFIX: &str = "UPDATE_STORE:";

/// Channel name of a topic.
pub fn topic_channel(name: &str) -> String {
    format!("{TOPIC_PREFIX}{name}")
}

/// A live subscription. Dropping it does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    router: IpcRouter,
    handle: BindingHandle,
}

impl Subscription {
    /// The underlying channel binding.
    pub fn handle(&self) -> &BindingHandle {
        &self.handle
    }

    /// Removes this subscription. Returns `false` if it was already gone.
    pub async fn unsubscribe(self) -> bool {
        self.router
            .off(&self.handle.channel, self.handle.binding.id)
            .await
    }
}

impl IpcRouter {
    /// Notifies every subscriber of `name`.
    pub async fn publish(&self, name: &str, args: Vec<Value>) -> InvokeResultSet {
        self.invoke(&topic_channel(name), args, InvokeOptions::new())
            .await
    }

    /// Subscribes this process to `name`. `None` if it already is.
    pub async fn subscribe<H: Handler>(&self, name: &str, handler: H) -> Option<Subscription> {
        let handle = self.handle(&topic_channel(name), handler).await?;
        Some(Subscription {
            router: self.clone(),
            handle,
        })
    }

    /// Drops this process's subscription to `name`.
    pub async fn unsubscribe(&self, name: &str) -> bool {
        self.off(&topic_channel(name), self.id()).await
    }
}
