//! Top-level runtime: configuration, logging, processes and plugins.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel_runtime::KeelRuntime;
//! use keel_framework::ModuleRegistry;
//!
//! let modules = ModuleRegistry::new();
//! // modules.register("hello/index.js", ...);
//!
//! let runtime = KeelRuntime::builder()
//!     .config_file("keel.toml")
//!     .modules(Arc::new(modules))
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_framework::{ModuleRegistry, ModuleSource, PluginManager, SourceOptions, UpdateReport};
use keel_transport::HttpClient;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{ConfigError, ConfigLoader, KeelConfig};
use crate::context::Context;
use crate::error::RuntimeResult;
use crate::host::ProcessHost;
use crate::logging;

/// A running Keel application.
///
/// The plugin manager lives in the main process and answers the plugin
/// channels for every renderer the host spawns.
pub struct KeelRuntime {
    config: KeelConfig,
    host: ProcessHost,
    plugins: Arc<PluginManager>,
    running: AtomicBool,
}

impl KeelRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(config: &KeelConfig, modules: Arc<dyn ModuleSource>) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let host = ProcessHost::new(config.ipc.timeout());
        let options = source_options(config)?;
        let plugins = PluginManager::new(host.main().router().clone(), modules, options);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            plugin_dir = %plugins.options().base_dir.display(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            host,
            plugins,
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn host(&self) -> &ProcessHost {
        &self.host
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Context of the main process.
    pub fn main(&self) -> Context {
        self.host.main()
    }

    /// Starts a renderer process.
    pub fn spawn(&self, name: &str) -> RuntimeResult<Context> {
        self.host.spawn(name)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Loads installed plugins and binds the plugin channels.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return Ok(());
        }
        info!("Starting Keel runtime");
        if let Err(e) = self.plugins.init().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        info!(
            plugins = self.plugins.list().await.len(),
            processes = %self.host.stats(),
            "Runtime started"
        );
        Ok(())
    }

    /// Unloads every plugin and stops every renderer.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Runtime is not running");
            return Ok(());
        }
        info!("Stopping Keel runtime");
        self.plugins.shutdown().await;
        self.host.kill_all().await;
        info!("Runtime stopped");
        Ok(())
    }

    /// Checks every installed plugin for a newer version.
    pub async fn update_plugins(&self) -> UpdateReport {
        self.plugins.update().await
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Keel runtime is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

/// Strategy settings derived from the `plugins` section.
pub fn source_options(config: &KeelConfig) -> RuntimeResult<SourceOptions> {
    let plugins = &config.plugins;
    let dir = plugins.resolve_dir().ok_or(ConfigError::NoDataDir)?;
    let http = HttpClient::with_timeout(plugins.http_timeout())?;

    let mut options = SourceOptions::new(dir, http);
    options.manifest_file.clone_from(&plugins.manifest_file);
    options.registry.clone_from(&plugins.registry);
    options.git_branch.clone_from(&plugins.git_branch);
    options.probe_window = plugins.probe_window();
    options.probe_concurrency = plugins.probe_concurrency;
    Ok(options)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`KeelRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    modules: Option<Arc<dyn ModuleSource>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            modules: None,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: KeelConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Where plugin scripts are evaluated. Defaults to an empty
    /// [`ModuleRegistry`].
    pub fn modules(mut self, modules: Arc<dyn ModuleSource>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn build(self) -> RuntimeResult<KeelRuntime> {
        let config = self.config_loader.load()?;
        let modules = self
            .modules
            .unwrap_or_else(|| Arc::new(ModuleRegistry::new()));
        KeelRuntime::from_config(&config, modules)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
