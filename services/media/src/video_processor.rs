//! Video gatekeeper and compressor.
//!
//! Videos above the size threshold are transcoded to H.264/AAC with the
//! largest dimension capped and a bounded bitrate. Compression problems never
//! fail the caller: the outcome is tagged `Passthrough` and the original (or
//! its downloaded copy) is handed back so the upload can still proceed.

use crate::cache::{self, DownloadError};
use crate::config::VideoConfig;
use crate::uri::{guess_extension, to_file_uri, MediaUri, UriError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during video compression.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Compressor exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("Compressor produced no output at {0}")]
    EmptyOutput(PathBuf),
}

/// How the encoder bounds output size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateControl {
    /// Average bitrate cap in bits per second
    Bitrate(u64),
    /// Constant rate factor (lower is higher quality)
    Crf(u8),
}

/// Encoder settings for one compression run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub max_dimension: u32,
    pub rate: RateControl,
    pub audio_bitrate: String,
    pub preset: String,
}

impl VideoSettings {
    /// Upload settings: bitrate-capped.
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            max_dimension: config.max_resolution,
            rate: RateControl::Bitrate(config.bitrate),
            audio_bitrate: config.audio_bitrate.clone(),
            preset: config.preset.clone(),
        }
    }

    /// Stored-object re-encode settings.
    pub fn constant_quality(config: &VideoConfig, crf: u8) -> Self {
        Self {
            rate: RateControl::Crf(crf),
            ..Self::from_config(config)
        }
    }

    /// Scale filter that caps the largest dimension and never upscales.
    /// libx264 needs even dimensions: the capped side is truncated to even and
    /// `-2` keeps the other side even.
    pub fn scale_filter(&self) -> String {
        let max = self.max_dimension;
        format!(
            "scale='if(gt(iw,ih),trunc(min({max},iw)/2)*2,-2)':'if(gt(iw,ih),-2,trunc(min({max},ih)/2)*2)'"
        )
    }
}

/// Something that can transcode a video file.
#[async_trait]
pub trait VideoCompressor: Send + Sync {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        settings: &VideoSettings,
    ) -> Result<(), VideoError>;
}

/// Compressor backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegCompressor {
    binary: PathBuf,
}

impl FfmpegCompressor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for one run.
    pub fn build_args(input: &Path, output: &Path, settings: &VideoSettings) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.display().to_string(),
            "-vf".into(),
            settings.scale_filter(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            settings.preset.clone(),
        ];

        match settings.rate {
            RateControl::Bitrate(bps) => {
                args.extend([
                    "-b:v".to_string(),
                    bps.to_string(),
                    "-maxrate".to_string(),
                    bps.to_string(),
                    "-bufsize".to_string(),
                    (bps * 2).to_string(),
                ]);
            }
            RateControl::Crf(crf) => {
                args.extend(["-crf".to_string(), crf.to_string()]);
            }
        }

        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            settings.audio_bitrate.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.display().to_string(),
        ]);

        args
    }
}

#[async_trait]
impl VideoCompressor for FfmpegCompressor {
    #[instrument(skip(self, settings), fields(input = %input.display()))]
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        settings: &VideoSettings,
    ) -> Result<(), VideoError> {
        let args = Self::build_args(input, output, settings);
        debug!(binary = %self.binary.display(), ?args, "Running compressor");

        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| VideoError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(VideoError::Exit {
                status: result.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }

        Ok(())
    }
}

/// Why a video was uploaded as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughReason {
    BelowThreshold { size_bytes: u64 },
    CompressionFailed(String),
}

/// Result of the video gatekeeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    Compressed {
        uri: String,
        path: PathBuf,
        original_bytes: u64,
        compressed_bytes: u64,
    },
    Passthrough {
        /// Original URI, or the `file://` URI of its downloaded copy
        uri: String,
        /// Downloaded copy owned by the gatekeeper, if any
        scratch: Option<PathBuf>,
        reason: PassthroughReason,
    },
}

impl VideoOutcome {
    pub fn uri(&self) -> &str {
        match self {
            VideoOutcome::Compressed { uri, .. } | VideoOutcome::Passthrough { uri, .. } => uri,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, VideoOutcome::Compressed { .. })
    }

    /// File the gatekeeper created and the caller may delete after upload.
    pub fn scratch_path(&self) -> Option<&Path> {
        match self {
            VideoOutcome::Compressed { path, .. } => Some(path),
            VideoOutcome::Passthrough { scratch, .. } => scratch.as_deref(),
        }
    }
}

/// Video gatekeeper for companion uploads.
pub struct VideoGatekeeper<C> {
    config: VideoConfig,
    cache_dir: PathBuf,
    http: reqwest::Client,
    compressor: C,
}

impl VideoGatekeeper<FfmpegCompressor> {
    pub fn with_ffmpeg(config: VideoConfig, cache_dir: PathBuf, http: reqwest::Client) -> Self {
        let compressor = FfmpegCompressor::new(config.ffmpeg_path.clone());
        Self::new(config, cache_dir, http, compressor)
    }
}

impl<C: VideoCompressor> VideoGatekeeper<C> {
    pub fn new(config: VideoConfig, cache_dir: PathBuf, http: reqwest::Client, compressor: C) -> Self {
        Self {
            config,
            cache_dir,
            http,
            compressor,
        }
    }

    /// Compress a video for upload, falling back to passthrough on failure.
    #[instrument(skip(self))]
    pub async fn prepare_video_for_upload(&self, uri: &str) -> VideoOutcome {
        let (local, scratch) = match self.localize(uri).await {
            Ok(localized) => localized,
            Err(e) => {
                warn!(uri = %uri, error = %e, "Video download failed, passing original through");
                return VideoOutcome::Passthrough {
                    uri: uri.to_string(),
                    scratch: None,
                    reason: PassthroughReason::CompressionFailed(e.to_string()),
                };
            }
        };

        let passthrough_uri = match &scratch {
            Some(path) => to_file_uri(path),
            None => uri.to_string(),
        };

        let original_bytes = match file_size(&local).await {
            Ok(size) => size,
            Err(e) => {
                warn!(uri = %uri, error = %e, "Video size check failed, passing original through");
                return VideoOutcome::Passthrough {
                    uri: passthrough_uri,
                    scratch,
                    reason: PassthroughReason::CompressionFailed(e.to_string()),
                };
            }
        };

        if original_bytes < self.config.min_compress_size_bytes() {
            debug!(size_bytes = original_bytes, "Video below compression threshold");
            return VideoOutcome::Passthrough {
                uri: passthrough_uri,
                scratch,
                reason: PassthroughReason::BelowThreshold {
                    size_bytes: original_bytes,
                },
            };
        }

        let output = cache::scratch_path(&self.cache_dir, "compressed", "mp4");
        let settings = VideoSettings::from_config(&self.config);

        match self.compress_to(&local, &output, &settings).await {
            Ok(compressed_bytes) => {
                if let Some(downloaded) = &scratch {
                    cache::remove_best_effort(downloaded).await;
                }
                info!(
                    original_bytes,
                    compressed_bytes,
                    "Video compressed for upload"
                );
                VideoOutcome::Compressed {
                    uri: to_file_uri(&output),
                    path: output,
                    original_bytes,
                    compressed_bytes,
                }
            }
            Err(e) => {
                cache::remove_best_effort(&output).await;
                warn!(uri = %uri, error = %e, "Video compression failed, passing original through");
                VideoOutcome::Passthrough {
                    uri: passthrough_uri,
                    scratch,
                    reason: PassthroughReason::CompressionFailed(e.to_string()),
                }
            }
        }
    }

    async fn localize(&self, uri: &str) -> Result<(PathBuf, Option<PathBuf>), VideoError> {
        match MediaUri::parse(uri)? {
            MediaUri::Remote(url) => {
                let path = cache::download_to_cache(
                    &self.http,
                    &url,
                    &self.cache_dir,
                    &guess_extension(uri),
                )
                .await?;
                Ok((path.clone(), Some(path)))
            }
            MediaUri::Local(path) => Ok((path, None)),
        }
    }

    async fn compress_to(
        &self,
        input: &Path,
        output: &Path,
        settings: &VideoSettings,
    ) -> Result<u64, VideoError> {
        cache::ensure_cache_dir(&self.cache_dir).await?;
        self.compressor.compress(input, output, settings).await?;

        match file_size(output).await {
            Ok(0) | Err(_) => Err(VideoError::EmptyOutput(output.to_path_buf())),
            Ok(size) => Ok(size),
        }
    }
}

async fn file_size(path: &Path) -> Result<u64, VideoError> {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|source| VideoError::Stat {
            path: path.to_path_buf(),
            source,
        })
}
