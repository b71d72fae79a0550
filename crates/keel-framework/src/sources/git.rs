//! Git repository strategy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use keel_core::Outcome;
use keel_transport::{
    GITHUB_ARCHIVE, GITHUB_RAW, Progress, TransportError, download_archive, exec, expand_all,
    fastest_by_throughput, first_successful, is_available,
};
use regex::Regex;
use tracing::{debug, info, warn};

use super::{
    CallResult, InfoOptions, InstallEvent, SourceOptions, Strategy, remove_dir, scan_manifests,
};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Manifest, PluginConfig, read_manifest_lenient};

static PROGRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Receiving objects:\s+(\d+)%\s+\((\d+)/(\d+)\)").expect("Invalid progress pattern")
});

static GITHUB_REPO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/]+/[^/]+)").expect("Invalid GitHub pattern")
});

static GITEE_REPO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://gitee\.com/[^/]+/[^/]+").expect("Invalid Gitee pattern")
});

/// Parses the last `Receiving objects` line in a chunk of `git` output.
pub fn parse_git_progress(output: &str) -> Option<Progress> {
    let caps = PROGRESS_PATTERN.captures_iter(output).last()?;
    Some(Progress {
        percent: caps[1].parse().ok()?,
        transferred: caps[2].parse().ok()?,
        total: caps[3].parse().ok()?,
    })
}

/// Local directory name for a repository URL.
fn repo_name(url: &str) -> &str {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last)
}

/// `owner/repo` of a GitHub URL.
fn github_name(url: &str) -> Option<String> {
    let caps = GITHUB_REPO.captures(url)?;
    let name = &caps[1];
    Some(name.strip_suffix(".git").unwrap_or(name).to_string())
}

/// Installs repositories into `<base>/git/<repo>`.
///
/// Uses `git` when available. Without it, GitHub repositories are fetched as
/// branch archives from the fastest mirror.
pub struct GitStrategy {
    options: SourceOptions,
    root: PathBuf,
    program: String,
}

impl GitStrategy {
    pub fn new(options: SourceOptions) -> Self {
        Self {
            root: options.base_dir.join("git"),
            options,
            program: "git".to_string(),
        }
    }

    /// Uses `program` instead of `git`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the plugin addressed by `locator` installs into.
    pub fn install_dir(&self, locator: &str) -> PathBuf {
        self.root.join(repo_name(locator))
    }

    async fn run(&self, name: &str, args: &[&str], cwd: &Path) -> PluginResult<()> {
        let output = exec(&self.program, args, Some(cwd), |_, chunk| {
            if let Some(progress) = parse_git_progress(chunk) {
                self.options.emit(InstallEvent::progress(name, progress));
            }
        })
        .await?;
        if !output.success() {
            return Err(PluginError::command(&self.program, output.code, output.stderr_text()));
        }
        Ok(())
    }

    async fn clone_repo(&self, url: &str, name: &str) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        if is_available(&self.program).await {
            return self.run(name, &["clone", url, name, "--progress"], &self.root).await;
        }

        let Some(repo) = github_name(url) else {
            return Err(PluginError::MissingProgram("git".to_string()));
        };
        let vars = HashMap::from([
            ("name", repo.as_str()),
            ("branch", self.options.git_branch.as_str()),
        ]);
        let mirrors = expand_all(GITHUB_ARCHIVE, &vars);
        let fastest = fastest_by_throughput(
            &self.options.http,
            &mirrors,
            self.options.probe_window,
            self.options.probe_concurrency,
        )
        .await
        .ok_or(TransportError::NoMirror)?;

        info!(plugin = %name, mirror = %fastest, "Git unavailable, downloading archive");
        download_archive(
            &self.options.http,
            &fastest,
            &self.root.join(".cache"),
            &self.root.join(name),
            |progress| self.options.emit(InstallEvent::progress(name, progress)),
        )
        .await?;
        Ok(())
    }

    async fn pull(&self, name: &str, dir: &Path) -> PluginResult<()> {
        let branch = self.options.git_branch.as_str();
        let origin = format!("origin/{branch}");
        self.run(name, &["fetch", "--all"], dir).await?;
        self.run(name, &["reset", "--hard", &origin], dir).await?;
        self.run(name, &["pull", "origin", branch, "--progress"], dir).await
    }

    async fn remote_info(&self, url: &str) -> Option<PluginConfig> {
        let file = self.options.manifest_file.as_str();
        let branch = self.options.git_branch.as_str();

        if let Some(repo) = GITEE_REPO.find(url) {
            let repo = repo.as_str().trim_end_matches(".git");
            let value = self
                .options
                .http
                .fetch_json(&format!("{repo}/raw/{branch}/{file}"))
                .await?;
            return serde_json::from_value(value).ok();
        }

        let repo = github_name(url)?;
        let vars = HashMap::from([
            ("name", repo.as_str()),
            ("branch", branch),
            ("filePath", file),
        ]);
        let mirrors = expand_all(GITHUB_RAW, &vars);
        let (mirror, value) =
            first_successful(&self.options.http, &mirrors, self.options.probe_concurrency).await?;
        debug!(url = %url, mirror = %mirror, "Remote manifest fetched");
        serde_json::from_value(value).ok()
    }
}

#[async_trait]
impl Strategy for GitStrategy {
    fn name(&self) -> &str {
        "git"
    }

    async fn info(&self, url: &str, options: InfoOptions) -> Option<Manifest> {
        let path = self.install_dir(url);
        let config = if options.local {
            read_manifest_lenient(&path, &self.options.manifest_file).await?
        } else {
            self.remote_info(url).await?
        };
        Some(Manifest { config, path })
    }

    async fn list(&self, _options: InfoOptions) -> Vec<Manifest> {
        scan_manifests(&self.root, &self.options.manifest_file).await
    }

    async fn install(&self, url: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        let name = repo_name(url);
        if name.is_empty() {
            return PluginError::UnsupportedSource(url.to_string()).into();
        }
        match self.clone_repo(url, name).await {
            Ok(()) => {
                info!(plugin = %name, url = %url, "Repository installed");
                Outcome::ok(CallResult::measure(name, &self.install_dir(url), started).await)
            }
            Err(e) => {
                warn!(plugin = %name, url = %url, error = %e, "Repository install failed");
                e.into()
            }
        }
    }

    async fn update(&self, url: &str) -> Outcome<CallResult> {
        let started = Instant::now();
        let name = repo_name(url);
        let dir = self.install_dir(url);
        if !tokio::fs::try_exists(dir.join(".git")).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                debug!(path = %dir.display(), error = %e, "No previous checkout to replace");
            }
            return self.install(url).await;
        }
        match self.pull(name, &dir).await {
            Ok(()) => Outcome::ok(CallResult::measure(name, &dir, started).await),
            Err(e) => {
                warn!(plugin = %name, error = %e, "Repository update failed");
                e.into()
            }
        }
    }

    async fn uninstall(&self, url: &str) -> Outcome<CallResult> {
        let name = repo_name(url);
        if matches!(name, "" | "." | "..") {
            return PluginError::UnsupportedSource(url.to_string()).into();
        }
        remove_dir(name, &self.install_dir(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_transport::HttpClient;

    #[test]
    fn test_parse_git_progress() {
        let chunk = "Receiving objects:  42% (21/50)\rReceiving objects:  64% (32/50)\r";
        let progress = parse_git_progress(chunk).unwrap();
        assert_eq!(progress.percent, 64);
        assert_eq!(progress.transferred, 32);
        assert_eq!(progress.total, 50);
        assert!(parse_git_progress("Cloning into 'demo'...").is_none());
    }

    #[test]
    fn test_repo_names() {
        assert_eq!(repo_name("https://github.com/owner/demo.git"), "demo");
        assert_eq!(repo_name("https://gitee.com/owner/demo/"), "demo");
        assert_eq!(
            github_name("https://github.com/owner/demo.git/tree/main").as_deref(),
            Some("owner/demo")
        );
        assert_eq!(github_name("https://gitee.com/owner/demo"), None);
    }

    fn strategy(base: &Path) -> GitStrategy {
        GitStrategy::new(SourceOptions::new(base, HttpClient::new().unwrap()))
    }

    #[tokio::test]
    async fn test_no_git_and_not_github() {
        let tmp = tempfile::tempdir().unwrap();
        let git = strategy(tmp.path()).with_program("keel-no-such-git");
        let outcome = git.install("https://gitee.com/owner/demo").await;
        assert!(!outcome.is_ok());
        assert_eq!(outcome.message(), "git is not installed");
    }

    #[tokio::test]
    async fn test_local_info_and_uninstall() {
        let tmp = tempfile::tempdir().unwrap();
        let git = strategy(tmp.path());
        let url = "https://github.com/owner/demo.git";
        let config = PluginConfig::new("demo", "1.0.0");
        crate::plugin::write_manifest(&git.install_dir(url), "plugin.json", &config)
            .await
            .unwrap();

        let manifest = git.info(url, InfoOptions::local()).await.unwrap();
        assert_eq!(manifest.config, config);
        assert_eq!(manifest.path, tmp.path().join("git/demo"));
        assert_eq!(git.list(InfoOptions::local()).await.len(), 1);

        assert!(git.uninstall(url).await.is_ok());
        assert!(git.info(url, InfoOptions::local()).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clone_reports_progress() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("fake-git");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             [ \"$1\" = \"--version\" ] && { echo 'git version 2.0'; exit 0; }\n\
             [ \"$1\" = \"clone\" ] || exit 2\n\
             mkdir -p \"$3\"\n\
             echo '{\"name\":\"demo\",\"version\":\"1.0.0\"}' > \"$3/plugin.json\"\n\
             echo 'Receiving objects: 100% (10/10)' 1>&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let git = strategy(&tmp.path().join("plugins")).with_program(fake.to_string_lossy());
        let mut events = git.options.subscribe();

        let outcome = git.install("https://example.com/owner/demo.git").await;
        let result = outcome.into_data().unwrap();
        assert_eq!(result.name, "demo");
        assert!(result.size > 0);
        assert!(result.path.join("plugin.json").is_file());

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            InstallEvent::Progress {
                name: "demo".into(),
                percent: 100,
                transferred: 10,
                total: 10,
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_pull_reports_exit_code() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("fake-git");
        std::fs::write(&fake, "#!/bin/sh\necho 'fatal: no remote' 1>&2\nexit 128\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let git = strategy(&tmp.path().join("plugins")).with_program(fake.to_string_lossy());
        let url = "https://example.com/owner/demo";
        std::fs::create_dir_all(git.install_dir(url).join(".git")).unwrap();

        let outcome = git.update(url).await;
        assert!(!outcome.is_ok());
        assert!(outcome.message().contains("128"));
        assert!(outcome.message().contains("fatal: no remote"));
    }
}
