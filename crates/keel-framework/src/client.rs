//! Remote access to a [`PluginManager`](crate::PluginManager).

use std::time::Duration;

use keel_core::{InvokeOptions, IpcRouter, MAIN_PROCESS_NAME, Outcome};
use serde_json::{Value, json};

use crate::orchestrator::{CALL_CHANNEL, INSTALL_CHANNEL, PLUGIN_PROCESS_NAME, UNINSTALL_CHANNEL};
use crate::plugin::PluginCallOptions;

/// Drives the plugin manager of the main or plugin-host process over IPC.
#[derive(Clone)]
pub struct PluginClient {
    router: IpcRouter,
    timeout: Option<Duration>,
}

impl PluginClient {
    pub fn new(router: IpcRouter) -> Self {
        Self {
            router,
            timeout: None,
        }
    }

    /// Overrides the router deadline. Installs can take minutes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn options(&self) -> InvokeOptions {
        let options = InvokeOptions::new().targets([MAIN_PROCESS_NAME, PLUGIN_PROCESS_NAME]);
        match self.timeout {
            Some(timeout) => options.timeout(timeout),
            None => options,
        }
    }

    async fn request(&self, channel: &str, args: Vec<Value>) -> Option<Value> {
        self.router
            .invoke(channel, args, self.options())
            .await
            .one()
            .map(|item| item.result.clone())
    }

    async fn outcome(&self, channel: &str, args: Vec<Value>) -> Outcome<bool> {
        match self.request(channel, args).await {
            Some(value) => serde_json::from_value(value)
                .unwrap_or_else(|e| Outcome::error(format!("malformed reply on {channel}: {e}"))),
            None => Outcome::error("plugin manager unreachable"),
        }
    }

    pub async fn install(&self, source: &str, name: Option<&str>) -> Outcome<bool> {
        self.outcome(INSTALL_CHANNEL, vec![json!(source), json!(name)])
            .await
    }

    pub async fn uninstall(&self, name: &str) -> Outcome<bool> {
        self.outcome(UNINSTALL_CHANNEL, vec![json!(name)]).await
    }

    /// One result per matching plugin; empty if no manager answered.
    pub async fn call(
        &self,
        export: &str,
        args: Vec<Value>,
        options: PluginCallOptions,
    ) -> Vec<Value> {
        let options = serde_json::to_value(options).unwrap_or(Value::Null);
        match self
            .request(CALL_CHANNEL, vec![json!(export), Value::Array(args), options])
            .await
        {
            Some(Value::Array(results)) => results,
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginManager;
    use crate::manager::tests::demo_modules;
    use crate::plugin::{PluginConfig, write_manifest};
    use crate::sources::SourceOptions;
    use keel_core::{Bus, MAIN_PROCESS_ID, ProcessHandle};
    use keel_transport::HttpClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_renderer_drives_main_manager() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("local/demo"),
            "plugin.json",
            &PluginConfig::new("demo", "1.0.0").with_script("index.js"),
        )
        .await
        .unwrap();

        let bus = Arc::new(Bus::new());
        let main = IpcRouter::main(bus.clone());
        main.serve(bus.attach(MAIN_PROCESS_ID));
        let options = SourceOptions::new(tmp.path(), HttpClient::new().unwrap());
        let manager = PluginManager::new(main, Arc::new(demo_modules()), options);
        manager.init().await.unwrap();

        let renderer = IpcRouter::new(ProcessHandle::renderer(1, "window"), bus.clone());
        renderer.serve(bus.attach(1));
        let client = PluginClient::new(renderer);

        assert_eq!(
            client
                .call("getVersion", vec![], PluginCallOptions::default())
                .await,
            vec![json!("1.0.0")]
        );
        assert!(
            client
                .call("getVersion", vec![], PluginCallOptions::named("other"))
                .await
                .is_empty()
        );

        let missing = client.uninstall("nothing").await;
        assert_eq!(missing.message(), "plugin not found");
        assert!(client.uninstall("demo").await.is_ok());
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_manager() {
        let bus = Arc::new(Bus::new());
        let main = IpcRouter::main(bus.clone());
        main.serve(bus.attach(MAIN_PROCESS_ID));
        let client = PluginClient::new(main).with_timeout(Duration::from_millis(200));

        let outcome = client.install("keel-demo", None).await;
        assert_eq!(outcome.message(), "plugin manager unreachable");
        assert!(
            client
                .call("getVersion", vec![], PluginCallOptions::default())
                .await
                .is_empty()
        );
    }
}
