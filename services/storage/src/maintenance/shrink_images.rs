//! Re-encode oversized stored JPEGs.
//!
//! Each shrunk object keeps its original under the `_original` sibling key.
//! Objects that would not get smaller are left untouched, and objects that
//! already have a backup are skipped so the original is never overwritten.

use super::{log_preview, resolve_prefixes, RunMode};
use crate::config::MaintenanceConfig;
use crate::object_store::{ObjectStore, ObjectSummary};
use anyhow::{Context, Result};
use reflections_media::encode_bounded_jpeg;
use reflections_shared::{keys, UploadDirection};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, instrument, warn};

const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const NO_CACHE: &str = "max-age=0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub key: String,
    pub size: u64,
}

impl fmt::Display for ImageCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} KB)", self.key, self.size / 1024)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShrinkImagesReport {
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

impl ShrinkImagesReport {
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// JPEGs at or above the size threshold, excluding backups
pub fn select_candidates(objects: &[ObjectSummary], threshold_bytes: u64) -> Vec<ImageCandidate> {
    objects
        .iter()
        .filter(|o| o.key.to_ascii_lowercase().ends_with(".jpg"))
        .filter(|o| !keys::is_backup_key(&o.key))
        .filter(|o| o.size >= threshold_bytes)
        .map(|o| ImageCandidate {
            key: o.key.clone(),
            size: o.size,
        })
        .collect()
}

/// Split candidates into those still to shrink and those with a backup in
/// the same listing
pub fn split_processed(
    candidates: Vec<ImageCandidate>,
    objects: &[ObjectSummary],
) -> (Vec<ImageCandidate>, usize) {
    let listed: HashSet<&str> = objects.iter().map(|o| o.key.as_str()).collect();
    let before = candidates.len();
    let pending: Vec<ImageCandidate> = candidates
        .into_iter()
        .filter(|c| !listed.contains(keys::backup_key(&c.key).as_str()))
        .collect();
    let processed = before - pending.len();
    (pending, processed)
}

enum Outcome {
    Shrunk { after: u64 },
    NotSmaller,
}

pub struct ShrinkImagesJob<'a> {
    store: &'a dyn ObjectStore,
    settings: &'a MaintenanceConfig,
    prefixes: Vec<String>,
}

impl<'a> ShrinkImagesJob<'a> {
    pub fn new(store: &'a dyn ObjectStore, settings: &'a MaintenanceConfig) -> Self {
        Self {
            store,
            settings,
            prefixes: Vec::new(),
        }
    }

    /// Restrict the scan to these prefixes instead of every explorer
    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.prefixes = prefixes;
        self
    }

    #[instrument(skip(self))]
    pub async fn run(&self, mode: RunMode) -> Result<ShrinkImagesReport> {
        let prefixes = resolve_prefixes(
            self.store,
            self.settings,
            &self.prefixes,
            &[UploadDirection::To, UploadDirection::From],
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

        let threshold = self.settings.image_size_threshold_kb * 1024;
        let (candidates, already_processed) =
            split_processed(select_candidates(&objects, threshold), &objects);

        let mut report = ShrinkImagesReport {
            dry_run: mode.is_dry_run(),
            scanned: objects.len(),
            candidates: candidates.len(),
            already_processed,
            ..ShrinkImagesReport::default()
        };

        info!(
            scanned = report.scanned,
            candidates = report.candidates,
            already_processed = report.already_processed,
            threshold_kb = self.settings.image_size_threshold_kb,
            max_width = self.settings.image_max_width,
            dry_run = report.dry_run,
            "Image shrink plan ready"
        );
        log_preview("Images to shrink", &candidates, self.settings.preview_limit);

        if mode.is_dry_run() {
            info!("Dry run, no changes made");
            return Ok(report);
        }

        for candidate in &candidates {
            match self.shrink(candidate).await {
                Ok(Outcome::Shrunk { after }) => {
                    report.shrunk += 1;
                    report.bytes_before += candidate.size;
                    report.bytes_after += after;
                    info!(
                        key = %candidate.key,
                        before_kb = candidate.size / 1024,
                        after_kb = after / 1024,
                        "Image shrunk"
                    );
                }
                Ok(Outcome::NotSmaller) => {
                    report.not_smaller += 1;
                    info!(key = %candidate.key, "Re-encode not smaller, skipped");
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(key = %candidate.key, error = %format!("{:#}", e), "Image shrink failed");
                }
            }
        }

        info!(
            shrunk = report.shrunk,
            not_smaller = report.not_smaller,
            errors = report.errors,
            saved_kb = report.bytes_saved() / 1024,
            "Image shrink finished"
        );

        Ok(report)
    }

    async fn shrink(&self, candidate: &ImageCandidate) -> Result<Outcome> {
        let original = self
            .store
            .get(&candidate.key)
            .await
            .context("download failed")?;
        let original_len = original.len() as u64;

        let max_width = self.settings.image_max_width;
        let quality = self.settings.jpeg_quality;
        let encoded = tokio::task::spawn_blocking(move || {
            encode_bounded_jpeg(&original, max_width, quality)
        })
        .await
        .context("image worker panicked")?
        .context("re-encode failed")?;

        if encoded.data.len() as u64 >= original_len {
            return Ok(Outcome::NotSmaller);
        }

        let backup = keys::backup_key(&candidate.key);
        self.store
            .copy_from(&self.store.bucket(), &candidate.key, &backup)
            .await
            .context("backup copy failed")?;

        let after = encoded.data.len() as u64;
        self.store
            .put(
                &candidate.key,
                encoded.data,
                JPEG_CONTENT_TYPE,
                Some(NO_CACHE.to_string()),
            )
            .await
            .context("upload failed")?;

        Ok(Outcome::Shrunk { after })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryObjectStore;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    fn noisy_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 + y * 13) as u8, (x * y) as u8, (x ^ y) as u8])
        });
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&img)
            .unwrap();
        out
    }

    fn settings() -> MaintenanceConfig {
        MaintenanceConfig {
            image_size_threshold_kb: 1,
            ..MaintenanceConfig::default()
        }
    }

    #[test]
    fn test_select_candidates() {
        let objects = vec![
            ObjectSummary::new("cole/to/1/image.jpg", 700 * 1024),
            ObjectSummary::new("cole/to/1/image_original.jpg", 900 * 1024),
            ObjectSummary::new("cole/to/2/image.jpg", 100 * 1024),
            ObjectSummary::new("cole/to/3/video.mp4", 9000 * 1024),
            ObjectSummary::new("cole/from/1690000000.JPG", 600 * 1024),
        ];

        let keys: Vec<String> = select_candidates(&objects, 600 * 1024)
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, vec!["cole/to/1/image.jpg", "cole/from/1690000000.JPG"]);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let store = MemoryObjectStore::new("reflections");
        store.insert("cole/to/1/image.jpg", noisy_jpeg(1600, 400, 100));
        let settings = settings();

        let report = ShrinkImagesJob::new(&store, &settings)
            .with_prefixes(vec!["cole/to/".to_string()])
            .run(RunMode::DryRun)
            .await
            .unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.shrunk, 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_execute_backs_up_then_replaces() {
        let store = MemoryObjectStore::new("reflections");
        let original = noisy_jpeg(1600, 400, 100);
        store.insert("cole/to/1/image.jpg", original.clone());
        let settings = settings();

        let report = ShrinkImagesJob::new(&store, &settings)
            .with_prefixes(vec!["cole/to/".to_string()])
            .run(RunMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.shrunk, 1);
        assert_eq!(report.errors, 0);
        assert!(report.bytes_saved() > 0);
        assert_eq!(
            store.writes(),
            vec!["copy cole/to/1/image_original.jpg", "put cole/to/1/image.jpg"]
        );

        let backup = store.object("cole/to/1/image_original.jpg").unwrap();
        assert_eq!(backup.body, original);

        let shrunk = store.object("cole/to/1/image.jpg").unwrap();
        assert_eq!(shrunk.content_type, "image/jpeg");
        assert_eq!(shrunk.cache_control.as_deref(), Some("max-age=0"));
        let decoded = image::load_from_memory(&shrunk.body).unwrap();
        assert_eq!(decoded.width(), 1080);
    }

    #[test]
    fn test_split_processed() {
        let objects = vec![
            ObjectSummary::new("cole/to/1/image.jpg", 700 * 1024),
            ObjectSummary::new("cole/to/1/image_original.jpg", 900 * 1024),
            ObjectSummary::new("cole/to/2/image.jpg", 700 * 1024),
        ];
        let (pending, processed) =
            split_processed(select_candidates(&objects, 600 * 1024), &objects);

        assert_eq!(processed, 1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "cole/to/2/image.jpg");
    }

    #[tokio::test]
    async fn test_second_run_keeps_original_backup() {
        let store = MemoryObjectStore::new("reflections");
        let original = noisy_jpeg(2400, 1600, 100);
        store.insert("cole/to/1/image.jpg", original.clone());
        let settings = settings();
        let job = ShrinkImagesJob::new(&store, &settings)
            .with_prefixes(vec!["cole/to/".to_string()]);

        let first = job.run(RunMode::Execute).await.unwrap();
        assert_eq!(first.shrunk, 1);
        let shrunk_once = store.object("cole/to/1/image.jpg").unwrap().body;

        let second = job.run(RunMode::Execute).await.unwrap();
        assert_eq!(second.shrunk, 0);
        assert_eq!(second.candidates, 0);
        assert_eq!(second.already_processed, 1);

        assert_eq!(store.object("cole/to/1/image_original.jpg").unwrap().body, original);
        assert_eq!(store.object("cole/to/1/image.jpg").unwrap().body, shrunk_once);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_not_smaller_is_left_alone() {
        let store = MemoryObjectStore::new("reflections");
        let compact = noisy_jpeg(512, 512, 10);
        assert!(compact.len() > 1024);
        store.insert("cole/from/7/image.jpg", compact.clone());
        let settings = settings();

        let report = ShrinkImagesJob::new(&store, &settings)
            .with_prefixes(vec!["cole/from/".to_string()])
            .run(RunMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.not_smaller, 1);
        assert_eq!(report.shrunk, 0);
        assert_eq!(report.errors, 0);
        assert!(store.writes().is_empty());
        assert_eq!(store.object("cole/from/7/image.jpg").unwrap().body, compact);
        assert!(store.object("cole/from/7/image_original.jpg").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_image_is_counted() {
        let store = MemoryObjectStore::new("reflections");
        store.insert("cole/to/1/image.jpg", vec![0xAB; 4096]);
        let settings = settings();

        let report = ShrinkImagesJob::new(&store, &settings)
            .with_prefixes(vec!["cole/to/".to_string()])
            .run(RunMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.errors, 1);
        assert!(store.writes().is_empty());
    }
}
