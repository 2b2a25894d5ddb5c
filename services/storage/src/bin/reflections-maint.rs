//! Reflections maintenance CLI.
//!
//! Every command only reports what it would do unless `--execute` is given.
//!
//! # Configuration
//!
//! Uses the storage service configuration (config/storage.toml and
//! `STORAGE__` environment variables). Jobs that touch Firestore need the
//! `firestore` section; `migrate` also needs `maintenance.migration`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use reflections_media::{init_logging, FfmpegCompressor, LoggingConfig};
use reflections_storage::maintenance::{
    CleanupJob, MigrationJob, RunMode, ShrinkImagesJob, ShrinkVideosJob,
};
use reflections_storage::{Config, FirestoreClient, S3ObjectStore};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "reflections-maint")]
#[command(about = "Maintenance jobs for the Reflections bucket and Firestore")]
struct Cli {
    /// Apply changes instead of printing the plan
    #[arg(long, global = true)]
    execute: bool,

    /// Bucket to operate on (overrides config)
    #[arg(long, env = "REFLECTIONS_BUCKET", global = true)]
    bucket: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete orphaned responses and selfies, strip expired audio URLs
    Cleanup,

    /// Copy v1 reflections, responses and objects into v2
    Migrate,

    /// Re-encode oversized JPEGs, keeping `_original` backups
    ShrinkImages {
        /// Prefix to scan, e.g. `cole/to/` (repeatable; default: all explorers)
        #[arg(long = "prefix")]
        prefixes: Vec<String>,

        /// Size threshold in KB (overrides config)
        #[arg(long)]
        threshold_kb: Option<u64>,
    },

    /// Re-encode inbox videos, keeping `_original` backups
    ShrinkVideos {
        /// Prefix to scan, e.g. `cole/to/` (repeatable; default: all explorers)
        #[arg(long = "prefix")]
        prefixes: Vec<String>,

        /// ffmpeg binary
        #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
        ffmpeg: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(bucket) = cli.bucket {
        config.s3.bucket = bucket;
    }

    let logging = LoggingConfig {
        level: config.service.log_level.clone(),
        format: config.service.log_format.clone(),
    };
    init_logging(&logging, &["reflections_storage", "reflections_media"])?;
    config.validate().context("Invalid configuration")?;

    let mode = RunMode::from_execute_flag(cli.execute);
    info!(
        service = "reflections-maint",
        version = env!("CARGO_PKG_VERSION"),
        bucket = %config.s3.bucket,
        dry_run = mode.is_dry_run(),
        "Starting"
    );

    if let Err(e) = run(cli.command, config, mode).await {
        error!(error = %format!("{:#}", e), "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, mut config: Config, mode: RunMode) -> anyhow::Result<()> {
    let store = S3ObjectStore::new(&config.s3).await;

    match command {
        Command::Cleanup => {
            config.firestore.validate("firestore")?;
            let docs = FirestoreClient::new(&config.firestore)?;
            let report = CleanupJob::new(&docs, &store, &config.maintenance)
                .run(mode)
                .await?;
            println!("{:#?}", report);
        }
        Command::Migrate => {
            let migration = &config.maintenance.migration;
            migration.validate()?;
            config.firestore.validate("firestore")?;

            let source_docs = FirestoreClient::new(&migration.firestore)
                .context("Failed to build v1 Firestore client")?;
            let target_docs = FirestoreClient::new(&config.firestore)
                .context("Failed to build v2 Firestore client")?;
            let source_store = store.with_bucket(migration.source_bucket.clone());

            let report =
                MigrationJob::new(&source_docs, &target_docs, &source_store, &store, migration)
                    .with_preview_limit(config.maintenance.preview_limit)
                    .run(mode)
                    .await?;
            println!("{:#?}", report);
        }
        Command::ShrinkImages {
            prefixes,
            threshold_kb,
        } => {
            if let Some(threshold_kb) = threshold_kb {
                config.maintenance.image_size_threshold_kb = threshold_kb;
            }
            let report = ShrinkImagesJob::new(&store, &config.maintenance)
                .with_prefixes(prefixes)
                .run(mode)
                .await?;
            println!("{:#?}", report);
        }
        Command::ShrinkVideos { prefixes, ffmpeg } => {
            let report =
                ShrinkVideosJob::new(&store, &config.maintenance, FfmpegCompressor::new(ffmpeg))
                    .with_prefixes(prefixes)
                    .run(mode)
                    .await?;
            println!("{:#?}", report);
        }
    }

    Ok(())
}
