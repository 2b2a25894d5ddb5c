//! Image gatekeeper.
//!
//! Normalizes an arbitrary local or remote image into a single cache-local
//! JPEG that is at most `max_upload_width` pixels wide. Pixels are rotated
//! into display orientation first, since the re-encode drops EXIF. Remote
//! images are downloaded first; the intermediate download is removed once
//! the final JPEG exists.

use crate::cache::{self, DownloadError};
use crate::config::ImageConfig;
use crate::uri::{guess_extension, to_file_uri, MediaUri, UriError};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Errors that can occur while preparing an image.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prepared image: {0}")]
    Write(#[source] std::io::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("JPEG encode failed: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A JPEG encoded in memory.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Displayed width before any downscale
    pub original_width: u32,
    pub resized: bool,
}

/// Result of the image gatekeeper.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Prepared JPEG on local disk
    pub path: PathBuf,
    /// `file://` URI of `path`
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

/// Displayed width from the image header without decoding pixels.
///
/// Honors the EXIF orientation, so a rotated portrait reports its short side.
pub fn measure_width(data: &[u8]) -> Option<u32> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_decoder()
        .ok()?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    Some(if swaps_axes(orientation) { height } else { width })
}

fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

/// Decode and rotate into display orientation.
pub fn decode_upright(data: &[u8]) -> Result<DynamicImage, ProcessingError> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Decode(ImageError::IoError(e)))?
        .into_decoder()
        .map_err(ProcessingError::Decode)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut image = DynamicImage::from_decoder(decoder).map_err(ProcessingError::Decode)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Decode upright, bound the width, and re-encode as JPEG.
///
/// Images are never enlarged; an image already within `max_width` is only
/// re-encoded.
pub fn encode_bounded_jpeg(
    data: &[u8],
    max_width: u32,
    quality: u8,
) -> Result<EncodedImage, ProcessingError> {
    let decoded = decode_upright(data)?;
    let original_width = decoded.width();

    let (image, resized) = if original_width > max_width {
        (downscale_to_width(&decoded, max_width), true)
    } else {
        (decoded, false)
    };

    let rgb = image.to_rgb8();
    let mut data = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut data, quality);
        encoder.encode_image(&rgb).map_err(ProcessingError::Encode)?;
    }

    Ok(EncodedImage {
        data,
        width: rgb.width(),
        height: rgb.height(),
        original_width,
        resized,
    })
}

/// Resize to exactly `width`, keeping the aspect ratio.
fn downscale_to_width(image: &DynamicImage, width: u32) -> DynamicImage {
    let height = ((image.height() as f64 * width as f64) / image.width() as f64).round() as u32;
    image.resize_exact(width, height.max(1), FilterType::Lanczos3)
}

/// Image gatekeeper for companion uploads.
pub struct ImageGatekeeper {
    config: ImageConfig,
    http: reqwest::Client,
}

impl ImageGatekeeper {
    /// Create a gatekeeper with its own HTTP client.
    pub fn new(config: ImageConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .build()?;
        Ok(Self::with_client(config, http))
    }

    pub fn with_client(config: ImageConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Return a local, cache-based JPEG no wider than `max_upload_width`.
    ///
    /// Failures are logged and returned; nothing is retried.
    pub async fn prepare_image_for_upload(&self, uri: &str) -> Result<PreparedImage, ProcessingError> {
        match self.prepare(uri).await {
            Ok(prepared) => Ok(prepared),
            Err(e) => {
                error!(uri = %uri, error = %e, "prepare_image_for_upload failed");
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn prepare(&self, uri: &str) -> Result<PreparedImage, ProcessingError> {
        let cache_dir = self.config.cache_dir();

        let (local_path, downloaded) = match MediaUri::parse(uri)? {
            MediaUri::Remote(url) => {
                let path =
                    cache::download_to_cache(&self.http, &url, &cache_dir, &guess_extension(uri))
                        .await?;
                (path.clone(), Some(path))
            }
            MediaUri::Local(path) => (path, None),
        };

        let result = self.encode_file(&local_path, &cache_dir).await;

        // Best-effort cleanup of the intermediate download, success or not.
        if let Some(downloaded) = downloaded {
            let keep = matches!(&result, Ok(prepared) if prepared.path == downloaded);
            if !keep {
                cache::remove_best_effort(&downloaded).await;
            }
        }

        result
    }

    async fn encode_file(
        &self,
        source: &Path,
        cache_dir: &Path,
    ) -> Result<PreparedImage, ProcessingError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| ProcessingError::Read {
                path: source.to_path_buf(),
                source: e,
            })?;

        let max_width = self.config.max_upload_width;
        let quality = self.config.jpeg_quality;
        let encoded =
            tokio::task::spawn_blocking(move || encode_bounded_jpeg(&data, max_width, quality))
                .await??;

        cache::ensure_cache_dir(cache_dir).await?;
        let output = cache::scratch_path(cache_dir, "prepared", "jpg");
        tokio::fs::write(&output, &encoded.data)
            .await
            .map_err(ProcessingError::Write)?;

        debug!(
            source = %source.display(),
            output = %output.display(),
            original_width = encoded.original_width,
            width = encoded.width,
            "Image re-encoded"
        );
        info!(
            width = encoded.width,
            height = encoded.height,
            resized = encoded.resized,
            size_bytes = encoded.data.len(),
            "Image prepared for upload"
        );

        Ok(PreparedImage {
            uri: to_file_uri(&output),
            path: output,
            width: encoded.width,
            height: encoded.height,
            resized: encoded.resized,
        })
    }
}
