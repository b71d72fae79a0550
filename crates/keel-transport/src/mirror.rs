//! Mirror templates and mirror racing.
//!
//! Templates contain `{key}` placeholders (for example `{name}`, `{branch}`,
//! `{filePath}`) that [`expand`] fills from a variable table. Unknown keys
//! expand to the empty string.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::{Captures, Regex};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::http::HttpClient;

/// Default measurement window per probe.
pub const DEFAULT_PROBE_WINDOW: Duration = Duration::from_millis(3000);

/// Default number of probes in flight.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 5;

/// Package registries by short name.
pub const NPM_REGISTRIES: &[(&str, &str)] = &[
    ("npm", "https://registry.npmjs.org/"),
    ("yarn", "https://registry.yarnpkg.com/"),
    ("tencent", "https://mirrors.cloud.tencent.com/npm/"),
    ("cnpm", "https://r.cnpmjs.org/"),
    ("taobao", "https://registry.npmmirror.com/"),
    ("npmMirror", "https://skimdb.npmjs.com/registry/"),
];

/// Registry used when none is configured.
pub const DEFAULT_NPM_REGISTRY: &str = "taobao";

/// GitHub branch archives.
pub const GITHUB_ARCHIVE: &[&str] = &[
    "https://github.com/{name}/archive/refs/heads/{branch}.tar.gz",
    "https://gh.ddlc.top/https://github.com/{name}/archive/refs/heads/{branch}.tar.gz",
    "https://ghproxy.net/https://github.com/{name}/archive/refs/heads/{branch}.tar.gz",
    "https://github.moeyy.xyz/https://github.com/{name}/archive/refs/heads/{branch}.tar.gz",
];

/// Single raw files inside a GitHub repository.
pub const GITHUB_RAW: &[&str] = &[
    "https://raw.githubusercontent.com/{name}/{branch}/{filePath}",
    "https://github.com/{name}/raw/{branch}/{filePath}",
    "https://fastly.jsdelivr.net/gh/{name}@{branch}/{filePath}",
    "https://gcore.jsdelivr.net/gh/{name}@{branch}/{filePath}",
    "https://ghproxy.net/https://raw.githubusercontent.com/{name}/{branch}/{filePath}",
    "https://github.moeyy.xyz/https://raw.githubusercontent.com/{name}/{branch}/{filePath}",
];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([_a-zA-Z0-9]+)\}").expect("Invalid placeholder pattern"));

/// URL of a registry by short name.
pub fn npm_registry(name: &str) -> Option<&'static str> {
    NPM_REGISTRIES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, url)| *url)
}

/// Fills the placeholders of one template.
pub fn expand(template: &str, vars: &HashMap<&str, &str>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            vars.get(&caps[1]).copied().unwrap_or_default().to_string()
        })
        .into_owned()
}

/// Fills every template in `templates`.
pub fn expand_all(templates: &[&str], vars: &HashMap<&str, &str>) -> Vec<String> {
    templates.iter().map(|t| expand(t, vars)).collect()
}

// =============================================================================
// Racing
// =============================================================================

/// Bytes received from `url` within `window`; `None` if the request failed.
async fn measure(client: HttpClient, url: String, window: Duration) -> Option<u64> {
    let mut transferred = 0u64;
    let outcome = tokio::time::timeout(window, async {
        let mut resp = client.inner().get(&url).send().await?.error_for_status()?;
        while let Some(chunk) = resp.chunk().await? {
            transferred += chunk.len() as u64;
        }
        Ok::<_, reqwest::Error>(())
    })
    .await;

    match outcome {
        Ok(Err(e)) => {
            trace!(url = %url, error = %e, "Probe failed");
            None
        }
        Ok(Ok(())) | Err(_) => Some(transferred),
    }
}

/// Probes every URL for `window` and returns the one that delivered the most
/// bytes. Ties go to the earlier URL. `None` if every probe failed.
pub async fn fastest_by_throughput(
    client: &HttpClient,
    urls: &[String],
    window: Duration,
    concurrency: usize,
) -> Option<String> {
    let results: Vec<(usize, Option<u64>)> = stream::iter(urls.iter().cloned().enumerate())
        .map(|(index, url)| {
            let client = client.clone();
            async move { (index, measure(client, url, window).await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let winner = results
        .into_iter()
        .filter_map(|(index, bytes)| bytes.map(|b| (index, b)))
        .min_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
        .map(|(index, bytes)| (urls[index].clone(), bytes));

    match &winner {
        Some((url, bytes)) => debug!(url = %url, bytes = bytes, "Fastest mirror selected"),
        None => debug!(candidates = urls.len(), "No mirror reachable"),
    }
    winner.map(|(url, _)| url)
}

/// Fetches every URL as JSON and returns the first non-empty answer together
/// with its URL. The remaining probes are cancelled once one succeeds.
pub async fn first_successful(
    client: &HttpClient,
    urls: &[String],
    concurrency: usize,
) -> Option<(String, Value)> {
    if urls.is_empty() {
        return None;
    }

    let cancel = CancellationToken::new();
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel(urls.len());

    for url in urls {
        let client = client.clone();
        let cancel = cancel.clone();
        let permits = Arc::clone(&permits);
        let tx = tx.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let found = tokio::select! {
                _ = cancel.cancelled() => None,
                found = async {
                    let _permit = permits.acquire_owned().await.ok()?;
                    client
                        .fetch_json(&url)
                        .await
                        .filter(|value| !keel_core::is_empty_value(value))
                } => found,
            };
            let _ = tx.send(found.map(|value| (url, value))).await;
        });
    }
    drop(tx);

    while let Some(result) = rx.recv().await {
        if let Some((url, value)) = result {
            cancel.cancel();
            debug!(url = %url, "First mirror answered");
            return Some((url, value));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_url, serve};
    use serde_json::json;

    fn vars<'a>(pairs: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_expand_known_and_unknown_keys() {
        let v = vars(&[("name", "owner/repo"), ("branch", "dev")]);
        assert_eq!(
            expand("https://x/{name}@{branch}/{filePath}", &v),
            "https://x/owner/repo@dev/"
        );
    }

    #[test]
    fn test_expand_all_github_archive() {
        let v = vars(&[("name", "a/b"), ("branch", "main")]);
        let urls = expand_all(GITHUB_ARCHIVE, &v);
        assert_eq!(urls.len(), GITHUB_ARCHIVE.len());
        assert_eq!(urls[0], "https://github.com/a/b/archive/refs/heads/main.tar.gz");
        assert!(urls.iter().all(|u| !u.contains('{')));
    }

    #[test]
    fn test_npm_registry_lookup() {
        assert_eq!(
            npm_registry(DEFAULT_NPM_REGISTRY),
            Some("https://registry.npmmirror.com/")
        );
        assert!(npm_registry("nope").is_none());
    }

    #[tokio::test]
    async fn test_fastest_picks_the_only_reachable_mirror() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let live = serve(vec![7u8; 64 * 1024]).await;
        let urls = vec![closed_url().await, live.clone(), closed_url().await];

        let winner =
            fastest_by_throughput(&client, &urls, Duration::from_millis(300), 5).await;
        assert_eq!(winner, Some(live));
    }

    #[tokio::test]
    async fn test_fastest_with_nothing_reachable() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let urls = vec![closed_url().await, closed_url().await];
        let winner =
            fastest_by_throughput(&client, &urls, Duration::from_millis(200), 5).await;
        assert!(winner.is_none());
    }

    /// Boxes both races the way an `async_trait` method body is boxed.
    fn boxed_races<'a>(
        client: &'a HttpClient,
        urls: &'a [String],
    ) -> keel_core::BoxFuture<'a, (Option<String>, Option<(String, Value)>)> {
        Box::pin(async move {
            let fastest = fastest_by_throughput(client, urls, Duration::from_millis(200), 2).await;
            let first = first_successful(client, urls, 2).await;
            (fastest, first)
        })
    }

    #[tokio::test]
    async fn test_races_run_inside_send_boxed_futures() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let body = br#"{"name":"demo","version":"1.0.0"}"#.to_vec();
        let reachable = serve(body).await;
        let urls = vec![closed_url().await, reachable.clone()];

        let handle = tokio::spawn({
            let client = client.clone();
            let urls = urls.clone();
            async move { boxed_races(&client, &urls).await }
        });
        let (fastest, first) = handle.await.unwrap();
        assert_eq!(fastest, Some(reachable.clone()));
        assert_eq!(first.map(|(url, _)| url), Some(reachable));
    }

    #[tokio::test]
    async fn test_first_successful_skips_empty_answers() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let empty = serve(b"{}".to_vec()).await;
        let full = serve(br#"{"name":"demo","version":"1.0.0"}"#.to_vec()).await;
        let urls = vec![closed_url().await, empty, full.clone()];

        let (url, value) = first_successful(&client, &urls, 5).await.unwrap();
        assert_eq!(url, full);
        assert_eq!(value["version"], json!("1.0.0"));
    }

    #[tokio::test]
    async fn test_first_successful_none() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        assert!(first_successful(&client, &[], 5).await.is_none());
        let urls = vec![closed_url().await];
        assert!(first_successful(&client, &urls, 5).await.is_none());
    }
}
