//! Re-encode stored inbox videos with a constant quality factor.
//!
//! Videos are staged through a local scratch directory because the encoder
//! works on files. Scratch files are removed whatever the outcome.

use super::{log_preview, resolve_prefixes, RunMode};
use crate::config::MaintenanceConfig;
use crate::object_store::{ObjectStore, ObjectSummary};
use anyhow::{Context, Result};
use reflections_media::cache::{ensure_cache_dir, remove_best_effort, scratch_path};
use reflections_media::config::VideoConfig;
use reflections_media::{VideoCompressor, VideoSettings};
use reflections_shared::keys::{self, VIDEO_FILENAME};
use reflections_shared::UploadDirection;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

const MP4_CONTENT_TYPE: &str = "video/mp4";
const NO_CACHE: &str = "max-age=0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShrinkVideosReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub candidates: usize,
    pub already_processed: usize,
    pub shrunk: usize,
    pub not_smaller: usize,
    pub errors: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl ShrinkVideosReport {
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Bundle videos, excluding backups
pub fn select_candidates(objects: &[ObjectSummary]) -> Vec<String> {
    let suffix = format!("/{}", VIDEO_FILENAME);
    objects
        .iter()
        .filter(|o| o.key.ends_with(&suffix) || o.key == VIDEO_FILENAME)
        .filter(|o| !keys::is_backup_key(&o.key))
        .map(|o| o.key.clone())
        .collect()
}

enum Outcome {
    Shrunk { before: u64, after: u64 },
    NotSmaller,
}

pub struct ShrinkVideosJob<'a, C> {
    store: &'a dyn ObjectStore,
    settings: &'a MaintenanceConfig,
    compressor: C,
    encoder: VideoSettings,
    prefixes: Vec<String>,
}

impl<'a, C: VideoCompressor> ShrinkVideosJob<'a, C> {
    pub fn new(store: &'a dyn ObjectStore, settings: &'a MaintenanceConfig, compressor: C) -> Self {
        Self {
            store,
            settings,
            compressor,
            encoder: VideoSettings::constant_quality(&VideoConfig::default(), settings.video_crf),
            prefixes: Vec::new(),
        }
    }

    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn encoder_settings(&self) -> &VideoSettings {
        &self.encoder
    }

    #[instrument(skip(self))]
    pub async fn run(&self, mode: RunMode) -> Result<ShrinkVideosReport> {
        let prefixes = resolve_prefixes(
            self.store,
            self.settings,
            &self.prefixes,
            &[UploadDirection::To],
        )
        .await;

        let mut objects = Vec::new();
        for prefix in &prefixes {
            let listed = self
                .store
                .list(prefix)
                .await
                .with_context(|| format!("Failed to list {}", prefix))?;
            info!(prefix = %prefix, objects = listed.len(), "Scanned prefix");
            objects.extend(listed);
        }

        let mut report = ShrinkVideosReport {
            dry_run: mode.is_dry_run(),
            scanned: objects.len(),
            ..ShrinkVideosReport::default()
        };

        let mut pending = Vec::new();
        for key in select_candidates(&objects) {
            match self.store.exists(&keys::backup_key(&key)).await {
                Ok(true) => report.already_processed += 1,
                Ok(false) => pending.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Backup check failed");
                    report.errors += 1;
                }
            }
        }
        report.candidates = pending.len();

        info!(
            scanned = report.scanned,
            candidates = report.candidates,
            already_processed = report.already_processed,
            crf = self.settings.video_crf,
            dry_run = report.dry_run,
            "Video shrink plan ready"
        );
        log_preview("Videos to shrink", &pending, self.settings.preview_limit);

        if mode.is_dry_run() {
            info!("Dry run, no changes made");
            return Ok(report);
        }

        let temp_dir = &self.settings.video_temp_dir;
        ensure_cache_dir(temp_dir)
            .await
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;

        for key in &pending {
            match self.shrink(key, temp_dir).await {
                Ok(Outcome::Shrunk { before, after }) => {
                    report.shrunk += 1;
                    report.bytes_before += before;
                    report.bytes_after += after;
                    info!(
                        key = %key,
                        before_kb = before / 1024,
                        after_kb = after / 1024,
                        "Video shrunk"
                    );
                }
                Ok(Outcome::NotSmaller) => {
                    report.not_smaller += 1;
                    info!(key = %key, "Re-encode not smaller, skipped");
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(key = %key, error = %format!("{:#}", e), "Video shrink failed");
                }
            }
        }

        if let Err(e) = tokio::fs::remove_dir(temp_dir).await {
            debug!(path = %temp_dir.display(), error = %e, "Temp directory left in place");
        }

        info!(
            shrunk = report.shrunk,
            not_smaller = report.not_smaller,
            errors = report.errors,
            saved_kb = report.bytes_saved() / 1024,
            "Video shrink finished"
        );

        Ok(report)
    }

    async fn shrink(&self, key: &str, temp_dir: &Path) -> Result<Outcome> {
        let input = scratch_path(temp_dir, "input", "mp4");
        let output = scratch_path(temp_dir, "output", "mp4");

        let result = self.shrink_with(key, &input, &output).await;

        remove_best_effort(&input).await;
        remove_best_effort(&output).await;
        result
    }

    async fn shrink_with(&self, key: &str, input: &Path, output: &Path) -> Result<Outcome> {
        let original = self.store.get(key).await.context("download failed")?;
        let before = original.len() as u64;
        tokio::fs::write(input, &original)
            .await
            .context("failed to stage download")?;
        drop(original);

        self.compressor
            .compress(input, output, &self.encoder)
            .await
            .context("encode failed")?;

        let compressed = tokio::fs::read(output)
            .await
            .context("failed to read encoder output")?;
        let after = compressed.len() as u64;
        if after >= before {
            return Ok(Outcome::NotSmaller);
        }

        self.store
            .copy_from(&self.store.bucket(), key, &keys::backup_key(key))
            .await
            .context("backup copy failed")?;
        self.store
            .put(key, compressed, MP4_CONTENT_TYPE, Some(NO_CACHE.to_string()))
            .await
            .context("upload failed")?;

        Ok(Outcome::Shrunk { before, after })
    }
}
