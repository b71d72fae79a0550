//! Archive download and extraction.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::http::{HttpClient, Progress};

/// Downloads a `.tar.gz` archive from `url` and unpacks it into `dest`.
///
/// Work files live in `cache`. If the archive holds a single top-level
/// directory (as branch archives do), its contents become `dest`. An
/// existing `dest` is replaced.
pub async fn download_archive<F>(
    client: &HttpClient,
    url: &str,
    cache: &Path,
    dest: &Path,
    on_progress: F,
) -> TransportResult<PathBuf>
where
    F: FnMut(Progress) + Send,
{
    tokio::fs::create_dir_all(cache).await?;
    let work = tempfile::Builder::new()
        .prefix(".keel-download-")
        .tempdir_in(cache)?;
    let archive = work.path().join("archive.tar.gz");

    info!(url = %url, dest = %dest.display(), "Downloading archive");
    client.download_to(url, &archive, on_progress).await?;

    let staging = work.path().join("unpacked");
    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_into(&archive, &staging, &dest_owned))
        .await
        .map_err(|e| TransportError::archive(e.to_string()))??;

    debug!(dest = %dest.display(), "Archive extracted");
    Ok(dest.to_path_buf())
}

/// Unpacks `archive` into `staging`, then moves the result to `dest`.
fn unpack_into(archive: &Path, staging: &Path, dest: &Path) -> TransportResult<()> {
    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    fs::create_dir_all(staging)?;
    tar.unpack(staging)
        .map_err(|e| TransportError::archive(e.to_string()))?;

    let root = single_root(staging)?.unwrap_or_else(|| staging.to_path_buf());
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&root, dest)?;
    Ok(())
}

/// The only entry of `dir` if it is a directory.
fn single_root(dir: &Path) -> TransportResult<Option<PathBuf>> {
    let entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    match entries.as_slice() {
        [only] if only.file_type()?.is_dir() => Ok(Some(only.path())),
        [] => Err(TransportError::archive("archive is empty")),
        _ => Ok(None),
    }
}
