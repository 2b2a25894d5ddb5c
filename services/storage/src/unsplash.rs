//! Unsplash photo search proxy. Keeps the access key server side.

use crate::config::UnsplashConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum UnsplashError {
    #[error("Server configuration error: Missing API Key")]
    MissingKey,

    #[error("Query parameter is required")]
    EmptyQuery,

    #[error("Unsplash API error: {0}")]
    Request(#[from] reqwest::Error),
}

/// Upstream status and raw JSON body, passed through unchanged
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub struct UnsplashClient {
    http: reqwest::Client,
    access_key: Option<String>,
    search_url: String,
    per_page: u32,
}

impl UnsplashClient {
    pub fn new(config: &UnsplashConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            access_key: config.access_key.clone().filter(|k| !k.is_empty()),
            search_url: format!("{}/search/photos", config.base_url.trim_end_matches('/')),
            per_page: config.per_page,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.access_key.is_some()
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<UpstreamResponse, UnsplashError> {
        let access_key = self.access_key.as_deref().ok_or(UnsplashError::MissingKey)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(UnsplashError::EmptyQuery);
        }

        let per_page = self.per_page.to_string();
        let response = self
            .http
            .get(&self.search_url)
            .query(&[
                ("query", query),
                ("order_by", "relevant"),
                ("content_filter", "high"),
                ("per_page", per_page.as_str()),
                ("orientation", "squarish"),
            ])
            .header("Authorization", format!("Client-ID {}", access_key))
            .header("Accept-Version", "v1")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!(status, size_bytes = body.len(), "Unsplash search completed");
        Ok(UpstreamResponse { status, body })
    }
}
