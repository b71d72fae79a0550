//! Plugin Host Example
//!
//! Runs a main process with the plugin manager and one renderer named
//! `window`. The renderer installs two local plugins, calls their exports,
//! listens to a topic one of them publishes, and removes them again.
//!
//! ```text
//! window ── plugin-install ──▶ main: PluginManager ──▶ local strategy (copy)
//! window ── plugin-call ─────▶ main: LifecycleManager ──▶ greeter, clock
//! clock  ── publish "tick" ──▶ window
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package plugin-host
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use keel::framework::plugin::{DESTROY_EXPORT, write_manifest};
use keel::prelude::*;
use serde_json::{Value, json};

// ============================================================================
// Plugin modules
// ============================================================================

/// `greeter/index.js`: a plain export table.
fn greeter() -> PluginExports {
    ExportTable::new()
        .with("getVersion", |_| async { Ok(json!("1.0.0")) })
        .with("greet", |args: Vec<Value>| async move {
            let who = args.first().and_then(Value::as_str).unwrap_or("world");
            Ok(json!(format!("hello, {who}")))
        })
        .into()
}

/// `clock/index.js`: built from the host context, publishes on `tick`.
fn clock() -> PluginExports {
    PluginExports::factory(|ctx: HostContext| async move {
        info!(plugin = %ctx.config.name, process = %ctx.process.name, "Clock starting");
        let router = ctx.router.clone();
        let version = ctx.config.version.clone();
        Ok(ExportTable::new()
            .with("getVersion", move |_| {
                let version = version.clone();
                async move { Ok(json!(version)) }
            })
            .with("now", move |_| {
                let router = router.clone();
                async move {
                    let millis = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    router.publish("tick", vec![json!(millis)]).await;
                    Ok(json!(millis))
                }
            })
            .with(DESTROY_EXPORT, |_| async {
                info!("Clock stopped");
                Ok(Value::Null)
            }))
    })
}

async fn write_plugin(root: &Path, name: &str, version: &str) -> Result<String> {
    let dir = root.join(name);
    let config = PluginConfig::new(name, version).with_script("index.js");
    write_manifest(&dir, "plugin.json", &config).await?;
    tokio::fs::write(dir.join("index.js"), format!("// {name}\n")).await?;
    Ok(dir.to_string_lossy().into_owned())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let workspace = tempfile::tempdir()?;
    let sources = workspace.path().join("sources");

    let modules = ModuleRegistry::new();
    modules.register("greeter/index.js", greeter);
    modules.register("clock/index.js", clock);

    let mut config = KeelConfig::default();
    config.plugins.dir = Some(workspace.path().join("plugins"));
    config.logging.level = "debug".to_string();

    let runtime = KeelRuntime::builder()
        .merge(config)
        .modules(Arc::new(modules))
        .build()?;
    runtime.start().await?;

    let window = runtime.spawn("window")?;
    window
        .subscribe("tick", |_event: HandlerEvent, args: Vec<Value>| async move {
            info!(at = ?args.first(), "Tick received in window");
            Value::Null
        })
        .await;

    let plugins = window
        .plugins()
        .with_timeout(Duration::from_secs(120));
    for (name, version) in [("greeter", "1.0.0"), ("clock", "0.3.1")] {
        let source = write_plugin(&sources, name, version).await?;
        let outcome = plugins.install(&source, None).await;
        if !outcome.is_ok() {
            bail!("installing {name} failed: {}", outcome.message());
        }
    }

    let versions = plugins
        .call("getVersion", vec![], PluginCallOptions::default())
        .await;
    info!(?versions, "All plugin versions");

    let greeting = plugins
        .call("greet", vec![json!("keel")], PluginCallOptions::named("greeter"))
        .await;
    info!(?greeting, "Greeter answered");

    let now = plugins
        .call("now", vec![], PluginCallOptions::named("clock"))
        .await;
    info!(?now, "Clock answered");

    let report = runtime.update_plugins().await;
    info!(?report, "Update sweep finished");

    for name in ["greeter", "clock"] {
        let outcome = plugins.uninstall(name).await;
        info!(plugin = %name, ok = outcome.is_ok(), message = %outcome.message(), "Uninstalled");
    }

    runtime.stop().await?;
    Ok(())
}
