//! Plugin acquisition strategies.
//!
//! A [`Strategy`] knows how to fetch, refresh and remove plugins of one kind
//! (git repositories, npm packages, local directories). Each strategy works
//! inside its own subdirectory of the plugin base directory and owns no
//! other state.
//!
//! Strategies are addressed by locators of the form `type+uri`, for example
//! `git+https://github.com/owner/repo` or `npm+left-pad`.
//!
//! | Strategy | Installs into | Backed by |
//! |----------|---------------|-----------|
//! | [`GitStrategy`] | `<base>/git/<repo>` | `git`, or a GitHub archive mirror |
//! | [`NpmStrategy`] | `<base>/npm/node_modules/<module>` | `npm` |
//! | [`LocalStrategy`] | `<base>/local/<name>` | a directory copy |

pub mod git;
pub mod local;
pub mod npm;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keel_core::Outcome;
use keel_transport::{
    DEFAULT_NPM_REGISTRY, DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_WINDOW, HttpClient, Progress,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{DEFAULT_MANIFEST_FILE, Manifest};

pub use git::{GitStrategy, parse_git_progress};
pub use local::LocalStrategy;
pub use npm::NpmStrategy;

static LOCATOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9]+)\+(.+)").expect("Invalid locator pattern")
});

/// Splits a `type+uri` locator.
pub fn parse_locator(locator: &str) -> Option<(&str, &str)> {
    let caps = LOCATOR_PATTERN.captures(locator)?;
    let kind = caps.get(1)?.as_str();
    let uri = caps.get(2)?.as_str();
    Some((kind, uri))
}

// =============================================================================
// Shared types
// =============================================================================

/// Options of `info` and `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoOptions {
    /// Read the installed copy instead of the remote one.
    pub local: bool,
}

impl InfoOptions {
    pub fn local() -> Self {
        Self { local: true }
    }

    pub fn remote() -> Self {
        Self { local: false }
    }
}

/// What an install, update or uninstall did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    /// Wall time in milliseconds.
    pub time: u64,
    pub path: PathBuf,
    /// Bytes on disk after the operation.
    pub size: u64,
    /// Directory or module name.
    pub name: String,
}

impl CallResult {
    /// Measures `path` and the time since `started`.
    pub async fn measure(name: impl Into<String>, path: &Path, started: Instant) -> Self {
        Self {
            time: started.elapsed().as_millis() as u64,
            size: dir_size(path).await,
            path: path.to_path_buf(),
            name: name.into(),
        }
    }
}

/// Progress published while a plugin is being fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstallEvent {
    Progress {
        name: String,
        percent: u8,
        transferred: u64,
        total: u64,
    },
    /// Activity without a measurable amount.
    Loading { name: String },
}

impl InstallEvent {
    pub fn progress(name: impl Into<String>, progress: Progress) -> Self {
        Self::Progress {
            name: name.into(),
            percent: progress.percent,
            transferred: progress.transferred,
            total: progress.total,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Progress { name, .. } | Self::Loading { name } => name,
        }
    }
}

/// Settings shared by the built-in strategies.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Plugin base directory; each strategy uses a subdirectory.
    pub base_dir: PathBuf,
    pub manifest_file: String,
    /// npm registry mirror name.
    pub registry: String,
    pub git_branch: String,
    pub probe_window: Duration,
    pub probe_concurrency: usize,
    pub http: HttpClient,
    pub events: broadcast::Sender<InstallEvent>,
}

impl SourceOptions {
    pub fn new(base_dir: impl Into<PathBuf>, http: HttpClient) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            base_dir: base_dir.into(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            registry: DEFAULT_NPM_REGISTRY.to_string(),
            git_branch: "main".to_string(),
            probe_window: DEFAULT_PROBE_WINDOW,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            http,
            events,
        }
    }

    /// Publishes an install event; dropped when nobody listens.
    pub fn emit(&self, event: InstallEvent) {
        trace!(plugin = %event.name(), event = ?event, "Install event");
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// One way of acquiring plugins.
///
/// `info` and `list` never fail; failures become `None` or are skipped.
/// `install`, `update` and `uninstall` report failures as error outcomes.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Name used in locators.
    fn name(&self) -> &str;

    async fn info(&self, locator: &str, options: InfoOptions) -> Option<Manifest>;

    /// Manifests of the installed plugins; unparseable entries are skipped.
    async fn list(&self, options: InfoOptions) -> Vec<Manifest>;

    async fn install(&self, locator: &str) -> Outcome<CallResult>;

    async fn update(&self, locator: &str) -> Outcome<CallResult>;

    /// Succeeds once the install directory no longer exists.
    async fn uninstall(&self, locator: &str) -> Outcome<CallResult>;
}

/// Strategies by name.
#[derive(Clone)]
pub struct StrategySet {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategySet {
    /// An empty set.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// The built-in `git`, `npm` and `local` strategies.
    pub fn new(options: SourceOptions) -> Self {
        let mut set = Self::empty();
        set.insert(Arc::new(GitStrategy::new(options.clone())));
        set.insert(Arc::new(NpmStrategy::new(options.clone())));
        set.insert(Arc::new(LocalStrategy::new(options)));
        set
    }

    /// Registers `strategy` under its name, replacing any previous one.
    pub fn insert(&mut self, strategy: Arc<dyn Strategy>) -> Option<Arc<dyn Strategy>> {
        let name = strategy.name().to_string();
        debug!(strategy = %name, "Strategy registered");
        self.strategies.insert(name, strategy)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    /// Resolves a `type+uri` locator to its strategy and uri.
    pub fn resolve<'a>(&self, locator: &'a str) -> PluginResult<(Arc<dyn Strategy>, &'a str)> {
        let (kind, uri) = parse_locator(locator)
            .ok_or_else(|| PluginError::UnsupportedSource(locator.to_string()))?;
        let strategy = self
            .get(kind)
            .ok_or_else(|| PluginError::NoStrategy(kind.to_string()))?;
        Ok((strategy, uri))
    }

    /// Installs through a `type+uri` locator.
    pub async fn install(&self, locator: &str) -> Outcome<CallResult> {
        match self.resolve(locator) {
            Ok((strategy, uri)) => strategy.install(uri).await,
            Err(e) => e.into(),
        }
    }

    pub async fn update(&self, locator: &str) -> Outcome<CallResult> {
        match self.resolve(locator) {
            Ok((strategy, uri)) => strategy.update(uri).await,
            Err(e) => e.into(),
        }
    }

    pub async fn uninstall(&self, locator: &str) -> Outcome<CallResult> {
        match self.resolve(locator) {
            Ok((strategy, uri)) => strategy.uninstall(uri).await,
            Err(e) => e.into(),
        }
    }

    pub async fn info(&self, locator: &str, options: InfoOptions) -> Option<Manifest> {
        let (strategy, uri) = self.resolve(locator).ok()?;
        strategy.info(uri, options).await
    }

    /// Installed manifests of every strategy.
    pub async fn list_all(&self, options: InfoOptions) -> Vec<Manifest> {
        let mut names: Vec<&String> = self.strategies.keys().collect();
        names.sort();
        let lists = futures::future::join_all(
            names
                .into_iter()
                .map(|name| self.strategies[name].list(options)),
        )
        .await;
        lists.into_iter().flatten().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySet")
            .field("strategies", &self.names())
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Total size of the files under `path`; 0 if it does not exist.
pub async fn dir_size(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

/// Reads the manifests of the immediate subdirectories of `dir`.
pub(crate) async fn scan_manifests(dir: &Path, file: &str) -> Vec<Manifest> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if let Some(config) = crate::plugin::read_manifest_lenient(&path, file).await {
            found.push(Manifest { config, path });
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

/// Removes `dir` and reports success once it is gone.
pub(crate) async fn remove_dir(name: &str, dir: &Path) -> Outcome<CallResult> {
    let started = Instant::now();
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            debug!(path = %dir.display(), error = %e, "Remove failed");
        }
        _ => {}
    }
    if tokio::fs::try_exists(dir).await.unwrap_or(true) {
        return Outcome::error(format!("uninstall failed: {name}"));
    }
    Outcome::ok(CallResult::measure(name, dir, started).await)
}
