//! # Keel Transport
//!
//! Network and process helpers used by the plugin acquisition strategies.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`http`] | reqwest client wrapper: JSON fetches and streamed downloads |
//! | [`mirror`] | Mirror templates, throughput racing and first-success racing |
//! | [`download`] | `.tar.gz` download and extraction |
//! | [`exec`] | External commands with live stdout/stderr |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  keel-framework     │  (git / npm / local strategies)
//! ├─────────────────────┤
//! │  keel-transport     │  <- This crate
//! ├─────────────────────┤
//! │  Network, processes │
//! └─────────────────────┘
//! ```

pub mod download;
pub mod error;
pub mod exec;
pub mod http;
pub mod mirror;

pub use download::download_archive;
pub use error::{TransportError, TransportResult};
pub use exec::{ExecOutput, StreamKind, exec, is_available};
pub use http::{DEFAULT_HTTP_TIMEOUT, HttpClient, Progress};
pub use mirror::{
    DEFAULT_NPM_REGISTRY, DEFAULT_PROBE_CONCURRENCY, DEFAULT_PROBE_WINDOW, GITHUB_ARCHIVE,
    GITHUB_RAW, NPM_REGISTRIES, expand, expand_all, fastest_by_throughput, first_successful,
    npm_registry,
};

#[cfg(test)]
pub(crate) mod testing {
    //! Local HTTP stub for tests.

    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` with status 200 to every request. Returns the base URL.
    pub async fn serve(body: Vec<u8>) -> String {
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
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/file")
    }

    /// A URL nothing listens on.
    pub async fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/file")
    }

    /// Builds a gzipped tarball from `(path, contents)` pairs.
    pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }
}
