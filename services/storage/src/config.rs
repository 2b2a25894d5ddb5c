use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the storage service and maintenance jobs
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Unsplash proxy configuration
    #[serde(default)]
    pub unsplash: UnsplashConfig,
    /// Firestore configuration
    #[serde(default)]
    pub firestore: FirestoreConfig,
    /// Maintenance job configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding event bundles and assets
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, Zenko, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Voice sample URL expiration in seconds
    #[serde(default = "default_voice_sample_expiry_secs")]
    pub voice_sample_expiry_secs: u64,
}

/// API configuration for the signed URL endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explorer used when a request names none
    #[serde(default = "default_explorer_id")]
    pub default_explorer_id: String,
    /// Maximum files per batch upload request
    #[serde(default = "default_max_batch_files")]
    pub max_batch_files: usize,
    /// Voices with a stored preview sample
    #[serde(default = "default_voice_samples")]
    pub voice_samples: Vec<String>,
}

/// Unsplash search proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UnsplashConfig {
    /// Access key; the search route answers 500 while unset
    pub access_key: Option<String>,
    /// API base URL
    #[serde(default = "default_unsplash_base_url")]
    pub base_url: String,
    /// Upstream timeout in seconds
    #[serde(default = "default_unsplash_timeout_secs")]
    pub timeout_secs: u64,
    /// Results per page
    #[serde(default = "default_unsplash_per_page")]
    pub per_page: u32,
}

/// Firestore REST configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
    /// Google Cloud project id
    #[serde(default)]
    pub project_id: String,
    /// Database id
    #[serde(default = "default_firestore_database")]
    pub database: String,
    /// REST base URL
    #[serde(default = "default_firestore_base_url")]
    pub base_url: String,
    /// Static OAuth access token (takes precedence over the service account)
    pub access_token: Option<String>,
    /// Service account key JSON file
    pub service_account_path: Option<PathBuf>,
    /// Documents per list page
    #[serde(default = "default_firestore_page_size")]
    pub page_size: u32,
}

/// Maintenance job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Explorers scanned when none can be discovered
    #[serde(default = "default_fallback_explorer_ids")]
    pub fallback_explorer_ids: Vec<String>,
    /// Explorer assumed for responses without one
    #[serde(default = "default_explorer_id")]
    pub default_explorer_id: String,
    /// Top-level prefixes that are never explorers
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
    /// Items listed per category during a dry run
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Images smaller than this are left alone
    #[serde(default = "default_image_size_threshold_kb")]
    pub image_size_threshold_kb: u64,
    /// Shrunk images are at most this wide
    #[serde(default = "default_image_max_width")]
    pub image_max_width: u32,
    /// JPEG quality for shrunk images
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Constant rate factor for shrunk videos
    #[serde(default = "default_video_crf")]
    pub video_crf: u8,
    /// Scratch directory for video downloads
    #[serde(default = "default_video_temp_dir")]
    pub video_temp_dir: PathBuf,
    /// v1 → v2 migration source
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source of the v1 → v2 migration
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// v1 bucket
    #[serde(default)]
    pub source_bucket: String,
    /// v1 top-level prefix, also the v1 explorerId
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Explorer id the v1 data belongs to in v2
    #[serde(default)]
    pub target_explorer_id: String,
    /// v1 Firestore project
    #[serde(default)]
    pub firestore: FirestoreConfig,
}

// Default value functions
fn default_service_name() -> String {
    "reflections-storage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_voice_sample_expiry_secs() -> u64 {
    15 * 60
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_explorer_id() -> String {
    "cole".to_string()
}

fn default_max_batch_files() -> usize {
    10
}

fn default_voice_samples() -> Vec<String> {
    [
        "en-US-Journey-O",
        "en-US-Studio-O",
        "en-US-Neural2-C",
        "en-US-Journey-D",
        "en-US-Studio-Q",
        "en-US-Casual-K",
        "en-US-Chirp3-HD-Sulafat",
        "en-US-Chirp3-HD-Achernar",
        "en-US-Chirp3-HD-Despina",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".to_string()
}

fn default_unsplash_timeout_secs() -> u64 {
    10
}

fn default_unsplash_per_page() -> u32 {
    30
}

fn default_firestore_database() -> String {
    "(default)".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_firestore_page_size() -> u32 {
    300
}

fn default_fallback_explorer_ids() -> Vec<String> {
    vec!["cole".to_string(), "peter".to_string()]
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["staging".to_string(), "assets".to_string()]
}

fn default_preview_limit() -> usize {
    20
}

fn default_image_size_threshold_kb() -> u64 {
    600
}

fn default_image_max_width() -> u32 {
    1080
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_video_crf() -> u8 {
    24
}

fn default_video_temp_dir() -> PathBuf {
    std::env::temp_dir().join("reflections-video-processing")
}

fn default_source_prefix() -> String {
    "cole".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "reflections-storage")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name("/etc/reflections/storage").required(false))
            // Override with environment variables
            // STORAGE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("STORAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }
        if self.api.default_explorer_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "api.default_explorer_id".to_string(),
            ));
        }
        if self.api.max_batch_files == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_batch_files".to_string(),
                message: "Must allow at least one file".to_string(),
            });
        }
        let quality = self.maintenance.jpeg_quality;
        if quality == 0 || quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "maintenance.jpeg_quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }
        if self.maintenance.video_crf > 51 {
            return Err(ConfigValidationError::InvalidValue {
                field: "maintenance.video_crf".to_string(),
                message: "CRF must be between 0 and 51".to_string(),
            });
        }
        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Get voice sample URL expiry as Duration
    pub fn voice_sample_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.voice_sample_expiry_secs)
    }
}

impl FirestoreConfig {
    pub fn validate(&self, section: &str) -> Result<(), ConfigValidationError> {
        if self.project_id.is_empty() {
            return Err(ConfigValidationError::MissingField(format!(
                "{}.project_id",
                section
            )));
        }
        if self.access_token.is_none() && self.service_account_path.is_none() {
            return Err(ConfigValidationError::MissingField(format!(
                "{}.access_token or {}.service_account_path",
                section, section
            )));
        }
        Ok(())
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.source_bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "maintenance.migration.source_bucket".to_string(),
            ));
        }
        if self.source_prefix.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "maintenance.migration.source_prefix".to_string(),
            ));
        }
        if self.target_explorer_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "maintenance.migration.target_explorer_id".to_string(),
            ));
        }
        self.firestore.validate("maintenance.migration.firestore")
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            default_explorer_id: default_explorer_id(),
            max_batch_files: default_max_batch_files(),
            voice_samples: default_voice_samples(),
        }
    }
}

impl Default for UnsplashConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            base_url: default_unsplash_base_url(),
            timeout_secs: default_unsplash_timeout_secs(),
            per_page: default_unsplash_per_page(),
        }
    }
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            database: default_firestore_database(),
            base_url: default_firestore_base_url(),
            access_token: None,
            service_account_path: None,
            page_size: default_firestore_page_size(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            fallback_explorer_ids: default_fallback_explorer_ids(),
            default_explorer_id: default_explorer_id(),
            excluded_prefixes: default_excluded_prefixes(),
            preview_limit: default_preview_limit(),
            image_size_threshold_kb: default_image_size_threshold_kb(),
            image_max_width: default_image_max_width(),
            jpeg_quality: default_jpeg_quality(),
            video_crf: default_video_crf(),
            video_temp_dir: default_video_temp_dir(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_bucket: String::new(),
            source_prefix: default_source_prefix(),
            target_explorer_id: String::new(),
            firestore: FirestoreConfig::default(),
        }
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
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            s3: S3Config {
                bucket: "reflections-test".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
                presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
                voice_sample_expiry_secs: default_voice_sample_expiry_secs(),
            },
            api: ApiConfig::default(),
            unsplash: UnsplashConfig::default(),
            firestore: FirestoreConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
        assert_eq!(default_voice_sample_expiry_secs(), 900);
        assert_eq!(default_image_size_threshold_kb(), 600);
        assert_eq!(default_video_crf(), 24);
        assert_eq!(default_excluded_prefixes(), vec!["staging", "assets"]);
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_missing_bucket() {
        let mut config = test_config();
        config.s3.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "s3.bucket"
        ));
    }

    #[test]
    fn test_invalid_crf() {
        let mut config = test_config();
        config.maintenance.video_crf = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_firestore_requires_credentials() {
        let firestore = FirestoreConfig {
            project_id: "reflections".to_string(),
            ..FirestoreConfig::default()
        };
        assert!(firestore.validate("firestore").is_err());

        let firestore = FirestoreConfig {
            access_token: Some("token".to_string()),
            ..firestore
        };
        assert!(firestore.validate("firestore").is_ok());
    }

    #[test]
    fn test_migration_requires_target() {
        let migration = MigrationConfig {
            source_bucket: "v1-bucket".to_string(),
            ..MigrationConfig::default()
        };
        assert!(matches!(
            migration.validate(),
            Err(ConfigValidationError::MissingField(field))
                if field == "maintenance.migration.target_explorer_id"
        ));
    }
}
