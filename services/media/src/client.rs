//! HTTP client for the Reflections storage API.
//!
//! Covers the signed-URL upload handshake and the inbox listing calls the
//! explorer and companion apps make.

use crate::config::ApiClientConfig;
use reflections_shared::{
    BatchUploadUrlsResponse, Event, EventMetadata, ListEventsResponse, ListPhotosResponse,
    SignedUrlResponse, UnsplashPhoto, UnsplashSearchResponse, UploadDirection,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Longest response body kept in a status error.
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to read upload body {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event {0} has no metadata URL")]
    MissingMetadataUrl(String),
}

/// Destination of one event bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub explorer_id: String,
    pub direction: UploadDirection,
    pub event_id: String,
}

impl UploadTarget {
    /// New bundle with a millisecond-timestamp event id.
    pub fn new(explorer_id: impl Into<String>, direction: UploadDirection) -> Self {
        Self {
            explorer_id: explorer_id.into(),
            direction,
            event_id: chrono::Utc::now().timestamp_millis().to_string(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct BatchUploadRequest<'a> {
    explorer_id: &'a str,
    event_id: &'a str,
    path: &'a str,
    files: &'a [&'a str],
}

/// Client for the storage API.
#[derive(Debug, Clone)]
pub struct ReflectionsClient {
    http: reqwest::Client,
    base_url: Url,
    explorer_id: String,
}

impl ReflectionsClient {
    pub fn new(config: &ApiClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(http, &config.base_url, &config.explorer_id)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        explorer_id: &str,
    ) -> Result<Self, ClientError> {
        // Url::join replaces the last segment unless the base ends in '/'.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        Ok(Self {
            http,
            base_url,
            explorer_id: explorer_id.to_string(),
        })
    }

    pub fn explorer_id(&self) -> &str {
        &self.explorer_id
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn endpoint(&self, name: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(name)?)
    }

    async fn check(response: reqwest::Response, endpoint: &str) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(text) => text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
            Err(e) => format!("<failed to read body: {e}>"),
        };
        Err(ClientError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Presigned PUT URL for one file of an event bundle.
    #[instrument(skip(self), fields(event_id = %target.event_id))]
    pub async fn request_upload_url(
        &self,
        target: &UploadTarget,
        filename: &str,
    ) -> Result<String, ClientError> {
        let mut url = self.endpoint("get-s3-url")?;
        url.query_pairs_mut()
            .append_pair("path", target.direction.as_str())
            .append_pair("explorer_id", &target.explorer_id)
            .append_pair("event_id", &target.event_id)
            .append_pair("filename", filename);

        let response = Self::check(self.http.get(url).send().await?, "get-s3-url").await?;
        let signed: SignedUrlResponse = response.json().await?;
        Ok(signed.url)
    }

    /// Presigned PUT URLs for several files of one event bundle.
    #[instrument(skip(self), fields(event_id = %target.event_id))]
    pub async fn request_batch_upload_urls(
        &self,
        target: &UploadTarget,
        files: &[&str],
    ) -> Result<BatchUploadUrlsResponse, ClientError> {
        let url = self.endpoint("get-batch-s3-upload-urls")?;
        let body = BatchUploadRequest {
            explorer_id: &target.explorer_id,
            event_id: &target.event_id,
            path: target.direction.as_str(),
            files,
        };

        let response = Self::check(
            self.http.post(url).json(&body).send().await?,
            "get-batch-s3-upload-urls",
        )
        .await?;
        Ok(response.json().await?)
    }

    /// PUT a local file to a presigned URL. Returns the bytes sent.
    #[instrument(skip(self, signed_url), fields(path = %path.display()))]
    pub async fn put_file(
        &self,
        signed_url: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<u64, ClientError> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.put_bytes(signed_url, body, content_type).await
    }

    /// PUT an in-memory body to a presigned URL.
    pub async fn put_bytes(
        &self,
        signed_url: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<u64, ClientError> {
        let size = body.len() as u64;
        let response = self
            .http
            .put(signed_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::check(response, "signed upload").await?;

        debug!(size_bytes = size, content_type, "Upload complete");
        Ok(size)
    }

    /// Event bundles in an explorer's inbox, newest first.
    #[instrument(skip(self))]
    pub async fn list_events(&self, explorer_id: &str) -> Result<Vec<Event>, ClientError> {
        let mut url = self.endpoint("list-mirror-events")?;
        url.query_pairs_mut()
            .append_pair("explorer_id", explorer_id)
            .append_pair("path", UploadDirection::To.as_str());

        let response = Self::check(self.http.get(url).send().await?, "list-mirror-events").await?;
        let listing: ListEventsResponse = response.json().await?;
        Ok(listing.events)
    }

    /// Fetch `metadata.json` through the event's presigned URL.
    pub async fn fetch_metadata(&self, event: &Event) -> Result<EventMetadata, ClientError> {
        if event.metadata_url.is_empty() {
            return Err(ClientError::MissingMetadataUrl(event.event_id.clone()));
        }

        let response = Self::check(
            self.http.get(&event.metadata_url).send().await?,
            "metadata.json",
        )
        .await?;
        Ok(response.json().await?)
    }

    /// List events and attach their metadata.
    ///
    /// An event whose metadata cannot be fetched is still returned, without
    /// metadata.
    pub async fn inbox(&self, explorer_id: &str) -> Result<Vec<Event>, ClientError> {
        let mut events = self.list_events(explorer_id).await?;
        for event in events.iter_mut() {
            if event.metadata_url.is_empty() {
                continue;
            }
            match self.fetch_metadata(event).await {
                Ok(metadata) => event.metadata = Some(metadata),
                Err(e) => warn!(event_id = %event.event_id, error = %e, "Metadata fetch failed"),
            }
        }
        Ok(events)
    }

    /// Presigned URLs of legacy single photos.
    #[instrument(skip(self))]
    pub async fn list_photos(&self, explorer_id: &str) -> Result<Vec<String>, ClientError> {
        let mut url = self.endpoint("list-mirror-photos")?;
        url.query_pairs_mut().append_pair("explorer_id", explorer_id);

        let response = Self::check(self.http.get(url).send().await?, "list-mirror-photos").await?;
        let listing: ListPhotosResponse = response.json().await?;
        Ok(listing.objects)
    }

    #[instrument(skip(self))]
    pub async fn search_images(&self, query: &str) -> Result<Vec<UnsplashPhoto>, ClientError> {
        let mut url = self.endpoint("unsplash-search")?;
        url.query_pairs_mut().append_pair("query", query);

        let response = Self::check(self.http.get(url).send().await?, "unsplash-search").await?;
        let results: UnsplashSearchResponse = response.json().await?;
        Ok(results.results)
    }
}
