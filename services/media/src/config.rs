//! Configuration management for the media gatekeeper and upload client.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the media tools.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Image gatekeeper configuration
    #[serde(default)]
    pub image: ImageConfig,

    /// Video gatekeeper configuration
    #[serde(default)]
    pub video: VideoConfig,

    /// Storage API client configuration
    #[serde(default)]
    pub api: ApiClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Image normalization settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Images wider than this are downscaled to it
    #[serde(default = "default_max_upload_width")]
    pub max_upload_width: u32,

    /// JPEG quality, 1-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Scratch directory for downloads and encoded output.
    /// Defaults to `{system temp}/reflections-cache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Timeout for remote image downloads in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

/// Video compression settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Largest output dimension in pixels
    #[serde(default = "default_max_resolution")]
    pub max_resolution: u32,

    /// Video bitrate cap in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u64,

    /// Inputs smaller than this many megabytes are passed through
    #[serde(default = "default_min_compress_size_mb")]
    pub min_compress_size_mb: u64,

    /// Audio bitrate passed to the encoder
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Encoder speed preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

/// Storage API client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiClientConfig {
    /// Base URL of the storage API (e.g. "https://api.example.com")
    #[serde(default)]
    pub base_url: String,

    /// Explorer this client sends to or receives for
    #[serde(default)]
    pub explorer_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_upload_width() -> u32 {
    1080
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_download_timeout() -> u64 {
    30
}
fn default_max_resolution() -> u32 {
    1080
}
fn default_bitrate() -> u64 {
    5 * 1000 * 1000 // 5 Mbps
}
fn default_min_compress_size_mb() -> u64 {
    2
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_preset() -> String {
    "medium".to_string()
}
fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_upload_width: default_max_upload_width(),
            jpeg_quality: default_jpeg_quality(),
            cache_dir: None,
            download_timeout_secs: default_download_timeout(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_resolution: default_max_resolution(),
            bitrate: default_bitrate(),
            min_compress_size_mb: default_min_compress_size_mb(),
            audio_bitrate: default_audio_bitrate(),
            preset: default_preset(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            explorer_id: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MediaConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/media.toml)
    /// 2. Environment-specific config (config/media.{env}.toml)
    /// 3. Environment variables (prefixed with MEDIA_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/media").required(false))
            .add_source(File::with_name(&format!("config/media.{}", run_mode)).required(false))
            // e.g. MEDIA__API__BASE_URL
            .add_source(
                Environment::with_prefix("MEDIA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the gatekeeper settings.
    ///
    /// The API section is checked separately by commands that talk to it.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.image.validate()?;
        self.video.validate()?;
        Ok(())
    }
}

impl ApiClientConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.base_url.is_empty() {
            return Err(ConfigValidationError::MissingField("api.base_url".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.base_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }
        if self.explorer_id.is_empty() {
            return Err(ConfigValidationError::MissingField("api.explorer_id".to_string()));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ImageConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_upload_width == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "image.max_upload_width".to_string(),
                message: "Width must be greater than 0".to_string(),
            });
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "image.jpeg_quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reflections-cache"))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_resolution == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "video.max_resolution".to_string(),
                message: "Resolution must be greater than 0".to_string(),
            });
        }
        if self.bitrate == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "video.bitrate".to_string(),
                message: "Bitrate must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Compression threshold in bytes.
    pub fn min_compress_size_bytes(&self) -> u64 {
        self.min_compress_size_mb * 1024 * 1024
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> MediaConfig {
        MediaConfig {
            image: ImageConfig::default(),
            video: VideoConfig::default(),
            api: ApiClientConfig {
                base_url: "https://api.example.com".to_string(),
                explorer_id: "cole".to_string(),
                request_timeout_secs: 30,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        assert!(config.api.validate().is_ok());
    }

    #[test]
    fn test_gatekeeper_defaults() {
        let config = create_test_config();
        assert_eq!(config.image.max_upload_width, 1080);
        assert_eq!(config.image.jpeg_quality, 80);
        assert_eq!(config.video.max_resolution, 1080);
        assert_eq!(config.video.bitrate, 5_000_000);
        assert_eq!(config.video.min_compress_size_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_missing_base_url() {
        let mut config = create_test_config();
        config.api.base_url = String::new();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.api.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = create_test_config();
        config.api.base_url = "ftp://api.example.com".to_string();
        assert!(matches!(
            config.api.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = create_test_config();
        config.image.jpeg_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_explorer() {
        let mut config = create_test_config();
        config.api.explorer_id = String::new();
        assert!(matches!(
            config.api.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }
}
