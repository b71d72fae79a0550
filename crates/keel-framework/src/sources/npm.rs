//! npm package strategy.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use keel_core::Outcome;
use keel_transport::{DEFAULT_NPM_REGISTRY, exec, npm_registry};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{CallResult, InfoOptions, InstallEvent, SourceOptions, Strategy};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Manifest, read_manifest_lenient};

/// CDN serving published package files.
pub const DEFAULT_PACKAGE_CDN: &str = "https://cdn.jsdelivr.net/npm";

/// Installs packages with `npm` into `<base>/npm/node_modules`.
pub struct NpmStrategy {
    options: SourceOptions,
    root: PathBuf,
    registry: String,
    program: String,
    cdn: String,
}

impl NpmStrategy {
    pub fn new(options: SourceOptions) -> Self {
        let registry = npm_registry(&options.registry)
            .or_else(|| npm_registry(DEFAULT_NPM_REGISTRY))
            .unwrap_or_default()
            .to_string();
        Self {
            root: options.base_dir.join("npm"),
            options,
            registry,
            program: "npm".to_string(),
            cdn: DEFAULT_PACKAGE_CDN.to_string(),
        }
    }

    /// Uses `program` instead of `npm`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Reads remote manifests from `cdn` instead of jsDelivr.
    pub fn with_cdn(mut self, cdn: impl Into<String>) -> Self {
        self.cdn = cdn.into();
        self
    }

    /// Registry URL passed to `npm`.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the plugin addressed by `module` installs into.
    pub fn install_dir(&self, module: &str) -> PathBuf {
        self.root.join("node_modules").join(module)
    }

    /// Creates the install root and its `package.json` if missing.
    async fn prepare(&self) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let package = self.root.join("package.json");
        if !tokio::fs::try_exists(&package).await.unwrap_or(false) {
            let body = serde_json::to_vec_pretty(&json!({ "dependencies": {} }))
                .map_err(PluginError::io)?;
            tokio::fs::write(&package, body).await?;
        }
        Ok(())
    }

    async fn run(&self, command: &str, module: &str, spec: &str) -> PluginResult<()> {
        self.prepare().await?;
        let registry = format!("--registry={}", self.registry);
        let args = [command, spec, "--color=always", "--save", registry.as_str()];
        let output = exec(&self.program, &args, Some(&self.root), |_, _| {
            self.options.emit(InstallEvent::Loading {
                name: module.to_string(),
            });
        })
        .await?;
        if !output.success() {
            return Err(PluginError::command(&self.program, output.code, output.stderr_text()));
        }
        Ok(())
    }

    async fn finish(
        &self,
        action: &str,
        module: &str,
        started: Instant,
        result: PluginResult<()>,
    ) -> Outcome<CallResult> {
        match result {
            Ok(()) => {
                info!(plugin = %module, action = %action, "npm operation finished");
                Outcome::ok(CallResult::measure(module, &self.install_dir(module), started).await)
            }
            Err(e) => {
                warn!(plugin = %module, action = %action, error = %e, "npm operation failed");
                e.into()
            }
        }
    }

    /// Names listed under `dependencies` in `package.json`.
    async fn dependencies(&self) -> Vec<String> {
        let Ok(bytes) = tokio::fs::read(self.root.join("package.json")).await else {
            return Vec::new();
        };
        let Ok(package) = serde_json::from_slice::<Value>(&bytes) else {
            return Vec::new();
        };
        let mut names: Vec<String> = package
            .get("dependencies")
            .and_then(Value::as_object)
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl Strategy for NpmStrategy {
    fn name(&self) -> &str {
        "npm"
    }

    async fn info(&self, module: &str, options: InfoOptions) -> Option<Manifest> {
        let path = self.install_dir(module);
        let config = if options.local {
            read_manifest_lenient(&path, &self.options.manifest_file).await?
        } else {
            let url = format!("{}/{module}/{}", self.cdn, self.options.manifest_file);
            let value = self.options.http.fetch_json(&url).await?;
            serde_json::from_value(value).ok()?
        };
        Some(Manifest { config, path })
    }

    async fn list(&self, options: InfoOptions) -> Vec<Manifest> {
        let mut found = Vec::new();
        for module in self.dependencies().await {
            if let Some(manifest) = self.info(&module, options).await {
                found.push(manifest);
            }
        }
        found
    }

    async fn install(&self, module: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        let result = self.run("install", module, module).await;
        self.finish("install", module, started, result).await
    }

    async fn update(&self, module: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        let result = self
            .run("install", module, &format!("{module}@latest"))
            .await;
        self.finish("update", module, started, result).await
    }

    async fn uninstall(&self, module: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        let mut result = self.run("uninstall", module, module).await;
        let leftover = tokio::fs::try_exists(self.install_dir(module)).await.unwrap_or(true);
        if result.is_ok() && leftover {
            result = Err(PluginError::Io(format!("uninstall failed: {module}")));
        }
        self.finish("uninstall", module, started, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginConfig, write_manifest};
    use crate::testing::serve_json;
    use keel_transport::HttpClient;

    fn strategy(base: &Path) -> NpmStrategy {
        NpmStrategy::new(SourceOptions::new(base, HttpClient::new().unwrap()))
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = SourceOptions::new(tmp.path(), HttpClient::new().unwrap());
        options.registry = "npm".into();
        assert_eq!(NpmStrategy::new(options.clone()).registry(), "https://registry.npmjs.org/");

        options.registry = "nowhere".into();
        assert_eq!(NpmStrategy::new(options).registry(), "https://registry.npmmirror.com/");
    }

    #[tokio::test]
    async fn test_list_follows_package_json() {
        let tmp = tempfile::tempdir().unwrap();
        let npm = strategy(tmp.path());
        npm.prepare().await.unwrap();
        assert!(npm.list(InfoOptions::local()).await.is_empty());

        tokio::fs::write(
            npm.root().join("package.json"),
            r#"{"dependencies":{"keel-demo":"^1.0.0","broken":"^1.0.0"}}"#,
        )
        .await
        .unwrap();
        write_manifest(
            &npm.install_dir("keel-demo"),
            "plugin.json",
            &PluginConfig::new("demo", "1.0.0"),
        )
        .await
        .unwrap();

        let listed = npm.list(InfoOptions::local()).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].config.name, "demo");
    }

    #[tokio::test]
    async fn test_remote_info_from_cdn() {
        let base = serve_json(json!({"name": "demo", "version": "2.0.0"})).await;
        let tmp = tempfile::tempdir().unwrap();
        let npm = strategy(tmp.path()).with_cdn(base);

        let manifest = npm.info("keel-demo", InfoOptions::remote()).await.unwrap();
        assert_eq!(manifest.config.version, "2.0.0");
        assert!(npm.info("keel-demo", InfoOptions::local()).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_runs_npm_with_registry() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("fake-npm");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             echo \"$@\" > args.txt\n\
             mkdir -p \"node_modules/$2\"\n\
             echo '{\"name\":\"demo\",\"version\":\"1.0.0\"}' > \"node_modules/$2/plugin.json\"\n\
             echo 'added 1 package'\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let npm = strategy(&tmp.path().join("plugins")).with_program(fake.to_string_lossy());
        let mut events = npm.options.subscribe();

        let result = npm.install("keel-demo").await.into_data().unwrap();
        assert_eq!(result.name, "keel-demo");
        assert_eq!(result.path, npm.install_dir("keel-demo"));
        assert!(result.size > 0);
        assert!(npm.root().join("package.json").is_file());

        let args = std::fs::read_to_string(npm.root().join("args.txt")).unwrap();
        assert_eq!(
            args.trim(),
            "install keel-demo --color=always --save --registry=https://registry.npmmirror.com/"
        );
        assert_eq!(
            events.recv().await.unwrap(),
            InstallEvent::Loading {
                name: "keel-demo".into()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_install_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("fake-npm");
        std::fs::write(&fake, "#!/bin/sh\necho 'npm ERR! 404 Not Found' 1>&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let npm = strategy(tmp.path()).with_program(fake.to_string_lossy());
        let outcome = npm.install("keel-missing").await;
        assert!(!outcome.is_ok());
        assert!(outcome.message().contains("exited with code 1"));
        assert!(outcome.message().contains("npm ERR! 404 Not Found"));
    }
}
