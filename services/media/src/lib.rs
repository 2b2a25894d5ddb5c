//! Media gatekeeper and upload client for Reflections.
//!
//! ```text
//! PendingMediaSlot -> ImageGatekeeper / VideoGatekeeper -> ReflectionsClient -> signed PUT
//! ```
//!
//! The gatekeepers are also used by the storage maintenance jobs to shrink
//! objects that were uploaded before normalization existed.

pub mod cache;
pub mod client;
pub mod config;
pub mod image_processor;
pub mod pending;
pub mod uploader;
pub mod uri;
pub mod video_processor;

pub use client::{ClientError, ReflectionsClient, UploadTarget};
pub use config::{ConfigValidationError, LoggingConfig, MediaConfig};
pub use image_processor::{
    encode_bounded_jpeg, EncodedImage, ImageGatekeeper, PreparedImage, ProcessingError,
};
pub use pending::PendingMediaSlot;
pub use uploader::{BundleDetails, UploadError, UploadReceipt, Uploader};
pub use video_processor::{
    FfmpegCompressor, PassthroughReason, RateControl, VideoCompressor, VideoError, VideoGatekeeper,
    VideoOutcome, VideoSettings,
};

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for a binary.
///
/// `RUST_LOG` directives are kept; the configured level applies to the
/// crates named in `targets`.
pub fn init_logging(config: &LoggingConfig, targets: &[&str]) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env()
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    for target in targets {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).try_init()?;
    } else {
        subscriber.with(fmt::layer().pretty()).try_init()?;
    }

    Ok(())
}
