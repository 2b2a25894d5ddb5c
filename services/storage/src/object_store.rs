use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid presign expiry: {0}")]
    Presign(String),

    #[error("S3 {operation} failed for {key}: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },
}

impl StoreError {
    fn backend(operation: &'static str, key: &str, err: impl std::error::Error) -> Self {
        StoreError::Backend {
            operation,
            key: key.to_string(),
            message: DisplayErrorContext(&err).to_string(),
        }
    }
}

/// Bucket operations used by the API and the maintenance jobs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> String;

    /// Every object under `prefix`, following continuation tokens.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Top-level common prefixes, without the trailing delimiter.
    async fn list_prefixes(&self, delimiter: &str) -> Result<Vec<String>, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: Option<String>,
    ) -> Result<(), StoreError>;

    /// Server-side copy from `source_bucket/source_key` into this bucket.
    async fn copy_from(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError>;

    async fn presign_put(&self, key: &str, expires_in: Duration) -> Result<String, StoreError>;
}

/// [`ObjectStore`] backed by S3 or an S3-compatible endpoint
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // MinIO / LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    pub fn from_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Same client, different bucket
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> String {
        self.bucket.clone()
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("list", prefix, e))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix = %prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_prefixes(&self, delimiter: &str) -> Result<Vec<String>, StoreError> {
        let mut prefixes = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .delimiter(delimiter)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("list_prefixes", "", e))?;

            prefixes.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(|p| p.trim_end_matches(delimiter).to_string())
                    .filter(|p| !p.is_empty()),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(prefixes)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::backend("get", key, e)
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::backend("get", key, e))?;

        Ok(body.into_bytes().to_vec())
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: Option<String>,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_cache_control(cache_control)
            .send()
            .await
            .map_err(|e| StoreError::backend("put", key, e))?;

        debug!(key = %key, "Object written");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn copy_from(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> Result<(), StoreError> {
        let copy_source = format!("{}/{}", source_bucket, urlencoding::encode(source_key));

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(copy_source)
            .send()
            .await
            .map_err(|e| StoreError::backend("copy", source_key, e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::backend("delete", key, e))?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StoreError::backend("head", key, e))
                }
            }
        }
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::backend("presign_get", key, e))?;

        Ok(presigned.uri().to_string())
    }

    async fn presign_put(&self, key: &str, expires_in: Duration) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StoreError::backend("presign_put", key, e))?;

        Ok(presigned.uri().to_string())
    }
}
