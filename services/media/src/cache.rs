//! Cache-scoped scratch files used by the gatekeepers.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Cache directory unavailable at {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Download request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to write download: {0}")]
    Io(#[from] io::Error),
}

/// Ensure the cache directory exists.
pub async fn ensure_cache_dir(dir: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DownloadError::CacheDir {
            path: dir.to_path_buf(),
            source,
        })
}

/// Unique scratch path: `{dir}/{prefix}_{millis}_{rand}.{ext}`
pub fn scratch_path(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    dir.join(format!("{}_{}_{}.{}", prefix, millis, &nonce[..8], extension))
}

/// Download a remote resource into the cache directory.
#[instrument(skip(http, cache_dir), fields(url = %url))]
pub async fn download_to_cache(
    http: &reqwest::Client,
    url: &Url,
    cache_dir: &Path,
    extension: &str,
) -> Result<PathBuf, DownloadError> {
    ensure_cache_dir(cache_dir).await?;

    let response = http.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await?;
    let target = scratch_path(cache_dir, "gatekeeper", extension);
    tokio::fs::write(&target, &body).await?;

    debug!(path = %target.display(), size_bytes = body.len(), "Downloaded to cache");

    Ok(target)
}

/// Delete a scratch file, ignoring failures.
pub async fn remove_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Scratch cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_scratch_path_shape() {
        let path = scratch_path(Path::new("/cache"), "gatekeeper", "png");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("gatekeeper_"));
        assert!(name.ends_with(".png"));
        assert_ne!(path, scratch_path(Path::new("/cache"), "gatekeeper", "png"));
    }

    #[tokio::test]
    async fn test_download_to_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("nested");
        let url = Url::parse(&format!("{}/photo.png", server.uri())).unwrap();

        let target = download_to_cache(&reqwest::Client::new(), &url, &cache, "png")
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), vec![1u8, 2, 3]);
        assert!(target.starts_with(&cache));
    }

    #[tokio::test]
    async fn test_download_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse(&format!("{}/missing.jpg", server.uri())).unwrap();
        let result = download_to_cache(&reqwest::Client::new(), &url, dir.path(), "jpg").await;

        assert!(matches!(result, Err(DownloadError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_remove_best_effort_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        remove_best_effort(&dir.path().join("nope.jpg")).await;
    }
}
