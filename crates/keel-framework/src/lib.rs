//! # Keel Framework
//!
//! Plugin management on top of the Keel IPC engine.
//!
//! This layer provides:
//! - Plugin manifests, export tables and script loading ([`plugin`])
//! - The per-process lifecycle manager ([`LifecycleManager`])
//! - Acquisition strategies for git, npm and local directories ([`sources`])
//! - The installing, updating plugin manager bound to IPC ([`PluginManager`])
//! - A client for driving that manager from any process ([`PluginClient`])
//!
//! ## Layout on disk
//!
//! ```text
//! <base>/
//! ├── git/<repo>/plugin.json        cloned repositories
//! ├── npm/node_modules/<module>/    npm packages
//! └── local/<name>/                 copied directories
//! ```
//!
//! Every installed plugin directory also carries an `update.json` recording
//! where it came from, which is what [`PluginManager::update`] consults.

pub mod client;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod plugin;
pub mod sources;

pub use client::PluginClient;
pub use error::{PluginError, PluginResult};
pub use manager::LifecycleManager;
pub use orchestrator::{
    CALL_CHANNEL, DetectedSource, INSTALL_CHANNEL, PLUGIN_PROCESS_NAME, PluginManager,
    UNINSTALL_CHANNEL, UPDATE_CHANNEL, UpdateReport, detect_source,
};
pub use plugin::{
    ExportTable, HostContext, Lifecycle, Manifest, ModuleRegistry, ModuleSource,
    PluginCallOptions, PluginConfig, PluginExports,
};
pub use sources::{InfoOptions, InstallEvent, SourceOptions, Strategy, StrategySet};

#[cfg(test)]
pub(crate) mod testing {
    //! Local HTTP stub for tests.

    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` as JSON on every path. Returns the base URL.
    pub async fn serve_json(body: Value) -> String {
        let body = serde_json::to_vec(&body).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }
}
