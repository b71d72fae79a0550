//! Thin HTTP client used by the acquisition strategies.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte-level progress of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// 0..=100; 0 while the total is unknown.
    pub percent: u8,
    pub transferred: u64,
    /// 0 when the server did not announce a length.
    pub total: u64,
}

impl Progress {
    pub fn new(transferred: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (transferred.min(total) * 100 / total) as u8
        };
        Self {
            percent,
            transferred,
            total,
        }
    }
}

/// Shared reqwest client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> TransportResult<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// The underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GETs `url` and parses the body as JSON.
    pub async fn get_json(&self, url: &str) -> TransportResult<Value> {
        trace!(url = %url, "GET");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Like [`get_json`](Self::get_json), with failures folded into `None`.
    pub async fn fetch_json(&self, url: &str) -> Option<Value> {
        match self.get_json(url).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(url = %url, error = %e, "JSON fetch failed");
                None
            }
        }
    }

    /// Streams `url` into the file `out`, creating parent directories.
    ///
    /// Returns the number of bytes written.
    pub async fn download_to<F>(
        &self,
        url: &str,
        out: &Path,
        mut on_progress: F,
    ) -> TransportResult<u64>
    where
        F: FnMut(Progress) + Send,
    {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = resp.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(out).await?;
        let mut transferred = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            transferred += chunk.len() as u64;
            on_progress(Progress::new(transferred, total));
        }
        file.flush().await?;

        debug!(url = %url, bytes = transferred, "Download finished");
        Ok(transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(50, 200).percent, 25);
        assert_eq!(Progress::new(10, 0).percent, 0);
        assert_eq!(Progress::new(300, 200).percent, 100);
    }

    #[tokio::test]
    async fn test_fetch_json_unreachable_is_none() {
        let client = HttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        assert!(client.fetch_json("http://127.0.0.1:9/none.json").await.is_none());
    }
}
