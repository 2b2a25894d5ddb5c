//! Media URI handling.

use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UriError {
    #[error("Empty media URI")]
    Empty,

    #[error("Invalid remote URI {uri}: {source}")]
    InvalidRemote {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid file URI: {0}")]
    InvalidFile(String),
}

/// Where a media item lives before it is prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaUri {
    /// `http://` or `https://` resource that must be downloaded first
    Remote(Url),
    /// File on local disk (`file://` URI or plain path)
    Local(PathBuf),
}

impl MediaUri {
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        if uri.is_empty() {
            return Err(UriError::Empty);
        }

        if is_remote_uri(uri) {
            let url = Url::parse(uri).map_err(|source| UriError::InvalidRemote {
                uri: uri.to_string(),
                source,
            })?;
            return Ok(MediaUri::Remote(url));
        }

        if uri.starts_with("file://") {
            let url = Url::parse(uri).map_err(|_| UriError::InvalidFile(uri.to_string()))?;
            let path = url
                .to_file_path()
                .map_err(|_| UriError::InvalidFile(uri.to_string()))?;
            return Ok(MediaUri::Local(path));
        }

        Ok(MediaUri::Local(PathBuf::from(uri)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaUri::Remote(_))
    }
}

pub fn is_remote_uri(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Best-effort extension used only to name a downloaded temp file.
pub fn guess_extension(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();

    if let Some((_, ext)) = last_segment.rsplit_once('.') {
        let ext = ext.to_ascii_lowercase();
        if !ext.is_empty() && ext.len() <= 5 {
            return ext;
        }
    }

    "jpg".to_string()
}

/// `file://` URI for a local path.
pub fn to_file_uri(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", path.display()),
    }
}
