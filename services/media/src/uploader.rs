//! Upload orchestration: pending media → gatekeeper → signed PUT.

use crate::cache;
use crate::client::{ClientError, ReflectionsClient, UploadTarget};
use crate::image_processor::{ImageGatekeeper, ProcessingError};
use crate::pending::PendingMediaSlot;
use crate::uri::MediaUri;
use crate::video_processor::{VideoCompressor, VideoGatekeeper, VideoOutcome};
use reflections_shared::keys::METADATA_FILENAME;
use reflections_shared::{EventMetadata, MediaKind, PendingMedia};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No media pending")]
    NothingPending,

    #[error("An upload is already in progress")]
    AlreadyUploading,

    #[error("Image preparation failed: {0}")]
    Image(#[from] ProcessingError),

    #[error("Prepared media is not a local file: {0}")]
    NotLocal(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Caption and sender written to the bundle's `metadata.json`.
#[derive(Debug, Clone, Default)]
pub struct BundleDetails {
    pub description: String,
    pub sender: String,
}

/// What a successful send produced.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub event_id: String,
    pub filename: &'static str,
    pub content_type: &'static str,
    pub bytes_sent: u64,
    /// Set for videos
    pub video: Option<VideoOutcome>,
}

/// Media ready for upload.
struct PreparedUpload {
    path: PathBuf,
    /// Gatekeeper-owned file to remove afterwards
    scratch: Option<PathBuf>,
    video: Option<VideoOutcome>,
}

/// Clears the uploading flag however `submit` exits.
struct UploadingGuard<'a>(&'a AtomicBool);

impl Drop for UploadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sends pending media to an explorer's inbox.
pub struct Uploader<C> {
    client: ReflectionsClient,
    images: ImageGatekeeper,
    videos: VideoGatekeeper<C>,
    uploading: AtomicBool,
}

impl<C: VideoCompressor> Uploader<C> {
    pub fn new(client: ReflectionsClient, images: ImageGatekeeper, videos: VideoGatekeeper<C>) -> Self {
        Self {
            client,
            images,
            videos,
            uploading: AtomicBool::new(false),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Take the pending media, prepare it, and upload it with its metadata.
    ///
    /// On failure the media goes back into the slot (unless a newer capture
    /// took its place) so the user can retry.
    #[instrument(skip(self, slot, details), fields(event_id = %target.event_id))]
    pub async fn submit(
        &self,
        slot: &PendingMediaSlot,
        target: &UploadTarget,
        details: &BundleDetails,
    ) -> Result<UploadReceipt, UploadError> {
        if self.uploading.swap(true, Ordering::SeqCst) {
            return Err(UploadError::AlreadyUploading);
        }
        let _guard = UploadingGuard(&self.uploading);

        let media = slot.take().ok_or(UploadError::NothingPending)?;

        let prepared = match self.prepare(&media).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Media preparation failed");
                slot.restore(media);
                return Err(e);
            }
        };

        let result = self.send(&media, &prepared, target, details).await;

        if let Some(scratch) = &prepared.scratch {
            cache::remove_best_effort(scratch).await;
        }

        match result {
            Ok(receipt) => {
                info!(
                    filename = receipt.filename,
                    bytes_sent = receipt.bytes_sent,
                    "Reflection sent"
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                slot.restore(media);
                Err(e)
            }
        }
    }

    async fn prepare(&self, media: &PendingMedia) -> Result<PreparedUpload, UploadError> {
        match media.kind {
            MediaKind::Photo => {
                let image = self.images.prepare_image_for_upload(&media.uri).await?;
                Ok(PreparedUpload {
                    scratch: Some(image.path.clone()),
                    path: image.path,
                    video: None,
                })
            }
            MediaKind::Video => {
                let outcome = self.videos.prepare_video_for_upload(&media.uri).await;
                let scratch = outcome.scratch_path().map(PathBuf::from);
                match MediaUri::parse(outcome.uri()) {
                    Ok(MediaUri::Local(path)) => Ok(PreparedUpload {
                        path,
                        scratch,
                        video: Some(outcome),
                    }),
                    _ => {
                        if let Some(scratch) = &scratch {
                            cache::remove_best_effort(scratch).await;
                        }
                        Err(UploadError::NotLocal(outcome.uri().to_string()))
                    }
                }
            }
        }
    }

    async fn send(
        &self,
        media: &PendingMedia,
        prepared: &PreparedUpload,
        target: &UploadTarget,
        details: &BundleDetails,
    ) -> Result<UploadReceipt, UploadError> {
        let filename = media.kind.bundle_filename();
        let content_type = media.kind.upload_content_type();

        let media_url = self.client.request_upload_url(target, filename).await?;
        let bytes_sent = self
            .client
            .put_file(&media_url, &prepared.path, content_type)
            .await?;

        let metadata = EventMetadata {
            description: details.description.clone(),
            sender: details.sender.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_id: target.event_id.clone(),
            content_type: Some(match media.kind {
                MediaKind::Photo => "text".to_string(),
                MediaKind::Video => "video".to_string(),
            }),
            ..EventMetadata::default()
        };
        let metadata_url = self
            .client
            .request_upload_url(target, METADATA_FILENAME)
            .await?;
        self.client
            .put_bytes(
                &metadata_url,
                serde_json::to_vec_pretty(&metadata)?,
                "application/json",
            )
            .await?;

        Ok(UploadReceipt {
            event_id: target.event_id.clone(),
            filename,
            content_type,
            bytes_sent,
            video: prepared.video.clone(),
        })
    }
}
