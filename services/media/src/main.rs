//! Reflections media CLI.
//!
//! Runs the gatekeeper on local files and drives the storage API the way the
//! companion and explorer apps do.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/media.toml, config/media.{env}.toml)
//! 2. Environment variables (prefixed with MEDIA__)
//!
//! `--base-url` and `--explorer-id` override the `api` section.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use reflections_media::{
    init_logging, BundleDetails, ImageGatekeeper, MediaConfig, PendingMediaSlot,
    ReflectionsClient, UploadTarget, Uploader, VideoGatekeeper,
};
use reflections_shared::{MediaKind, MediaSource, PendingMedia, UploadDirection};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "reflections-media")]
#[command(about = "Prepare and send Reflections media")]
struct Cli {
    /// Storage API base URL (overrides config)
    #[arg(long, env = "REFLECTIONS_API_URL", global = true)]
    base_url: Option<String>,

    /// Explorer id (overrides config)
    #[arg(long, env = "REFLECTIONS_EXPLORER_ID", global = true)]
    explorer_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize an image into a cache-local JPEG
    PrepareImage { uri: String },

    /// Compress a video, or report why it was passed through
    PrepareVideo { uri: String },

    /// Prepare and upload one photo or video
    Send {
        uri: String,

        #[arg(long, value_enum, default_value_t = KindArg::Photo)]
        kind: KindArg,

        #[arg(long, value_enum, default_value_t = SourceArg::Gallery)]
        source: SourceArg,

        /// `to` sends to the explorer, `from` replies to a companion
        #[arg(long, default_value = "to")]
        path: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "Companion")]
        sender: String,
    },

    /// List inbox events with their metadata
    Inbox,

    /// List legacy single photos
    Photos,

    /// Search stock images
    Search { query: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Photo,
    Video,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Camera,
    Gallery,
    Search,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Photo => MediaKind::Photo,
            KindArg::Video => MediaKind::Video,
        }
    }
}

impl From<SourceArg> for MediaSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Camera => MediaSource::Camera,
            SourceArg::Gallery => MediaSource::Gallery,
            SourceArg::Search => MediaSource::Search,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = MediaConfig::load().context("Failed to load media configuration")?;
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if let Some(explorer_id) = cli.explorer_id {
        config.api.explorer_id = explorer_id;
    }

    init_logging(&config.logging, &["reflections_media", "reflections_shared"])?;
    config.validate()?;

    info!(
        service = "reflections-media",
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    if let Err(e) = run(cli.command, &config).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, config: &MediaConfig) -> anyhow::Result<()> {
    match command {
        Command::PrepareImage { uri } => {
            let gatekeeper = ImageGatekeeper::new(config.image.clone())?;
            let prepared = gatekeeper.prepare_image_for_upload(&uri).await?;
            println!(
                "{} ({}x{}, resized: {})",
                prepared.uri, prepared.width, prepared.height, prepared.resized
            );
        }
        Command::PrepareVideo { uri } => {
            let gatekeeper = VideoGatekeeper::with_ffmpeg(
                config.video.clone(),
                config.image.cache_dir(),
                reqwest::Client::new(),
            );
            let outcome = gatekeeper.prepare_video_for_upload(&uri).await;
            println!("{:#?}", outcome);
        }
        Command::Send {
            uri,
            kind,
            source,
            path,
            description,
            sender,
        } => {
            config.api.validate()?;
            let client = ReflectionsClient::new(&config.api)?;
            let http = client.http().clone();
            let uploader = Uploader::new(
                client,
                ImageGatekeeper::with_client(config.image.clone(), http.clone()),
                VideoGatekeeper::with_ffmpeg(config.video.clone(), config.image.cache_dir(), http),
            );

            let slot = PendingMediaSlot::new();
            slot.set(PendingMedia::new(uri, kind.into(), source.into()));

            let target = UploadTarget::new(
                config.api.explorer_id.clone(),
                UploadDirection::parse_lenient(Some(&path)),
            );
            let receipt = uploader
                .submit(&slot, &target, &BundleDetails { description, sender })
                .await?;
            println!(
                "Sent {} ({} bytes) as event {}",
                receipt.filename, receipt.bytes_sent, receipt.event_id
            );
        }
        Command::Inbox => {
            config.api.validate()?;
            let client = ReflectionsClient::new(&config.api)?;
            for event in client.inbox(client.explorer_id()).await? {
                let description = event
                    .metadata
                    .as_ref()
                    .map(|m| m.description.as_str())
                    .unwrap_or("");
                println!("{}\t{}\t{}", event.event_id, description, event.image_url);
            }
        }
        Command::Photos => {
            config.api.validate()?;
            let client = ReflectionsClient::new(&config.api)?;
            for url in client.list_photos(client.explorer_id()).await? {
                println!("{}", url);
            }
        }
        Command::Search { query } => {
            config.api.validate()?;
            let client = ReflectionsClient::new(&config.api)?;
            for photo in client.search_images(&query).await? {
                println!("{}\t{}", photo.id, photo.urls.regular);
            }
        }
    }

    Ok(())
}
