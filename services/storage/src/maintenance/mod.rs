//! Operational jobs run through `reflections-maint`.
//!
//! Every job plans first from a full listing, logs a preview of the plan, and
//! only touches Firestore or the bucket in [`RunMode::Execute`]. Planning
//! functions are pure so dry runs and tests see exactly what would happen.

pub mod cleanup;
pub mod migrate;
pub mod shrink_images;
pub mod shrink_videos;

use crate::config::MaintenanceConfig;
use crate::object_store::ObjectStore;
use reflections_shared::{keys, UploadDirection};
use std::collections::BTreeSet;
use std::fmt::Display;
use tracing::{info, warn};

pub use cleanup::{CleanupJob, CleanupPlan, CleanupReport};
pub use migrate::{MigrationJob, MigrationPlan, MigrationReport};
pub use shrink_images::{ShrinkImagesJob, ShrinkImagesReport};
pub use shrink_videos::{ShrinkVideosJob, ShrinkVideosReport};

pub const REFLECTIONS_COLLECTION: &str = "reflections";
pub const RESPONSES_COLLECTION: &str = "responses";
pub const RELATIONSHIPS_COLLECTION: &str = "relationships";

/// Whether a job may write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Execute,
}

impl RunMode {
    pub fn from_execute_flag(execute: bool) -> Self {
        if execute {
            RunMode::Execute
        } else {
            RunMode::DryRun
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

/// First `limit` items, then an "... and N more" line
pub fn preview_lines<T: Display>(items: &[T], limit: usize) -> Vec<String> {
    let mut lines: Vec<String> = items
        .iter()
        .take(limit)
        .map(|item| format!("  - {}", item))
        .collect();
    if items.len() > limit {
        lines.push(format!("  ... and {} more", items.len() - limit));
    }
    lines
}

pub fn log_preview<T: Display>(title: &str, items: &[T], limit: usize) {
    info!(count = items.len(), "{}", title);
    for line in preview_lines(items, limit) {
        info!("{}", line);
    }
}

/// Top-level bucket prefixes that name explorers
pub async fn discover_explorer_prefixes(
    store: &dyn ObjectStore,
    settings: &MaintenanceConfig,
) -> Vec<String> {
    match store.list_prefixes("/").await {
        Ok(prefixes) => prefixes
            .into_iter()
            .filter(|p| !settings.excluded_prefixes.contains(p))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to discover explorer prefixes");
            Vec::new()
        }
    }
}

/// Union of known ids; the configured fallbacks when nothing is known
pub fn merge_explorer_ids<I>(ids: I, settings: &MaintenanceConfig) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let merged: BTreeSet<String> = ids
        .into_iter()
        .filter(|id| !id.is_empty() && !settings.excluded_prefixes.contains(id))
        .collect();
    if merged.is_empty() {
        settings.fallback_explorer_ids.clone()
    } else {
        merged.into_iter().collect()
    }
}

/// `{explorer}/{direction}/` for every explorer and direction
pub fn explorer_prefixes(explorers: &[String], directions: &[UploadDirection]) -> Vec<String> {
    explorers
        .iter()
        .flat_map(|explorer| {
            directions
                .iter()
                .map(move |direction| keys::direction_prefix(explorer, *direction))
        })
        .collect()
}

/// Prefixes for the shrink jobs: explicit ones, else every discovered explorer
pub async fn resolve_prefixes(
    store: &dyn ObjectStore,
    settings: &MaintenanceConfig,
    explicit: &[String],
    directions: &[UploadDirection],
) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    let discovered = discover_explorer_prefixes(store, settings).await;
    explorer_prefixes(&merge_explorer_ids(discovered, settings), directions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryObjectStore;

    #[test]
    fn test_preview_lines_truncates() {
        let items: Vec<u32> = (1..=5).collect();
        assert_eq!(
            preview_lines(&items, 2),
            vec!["  - 1", "  - 2", "  ... and 3 more"]
        );
        assert_eq!(preview_lines(&items, 10).len(), 5);
    }

    #[test]
    fn test_merge_explorer_ids() {
        let settings = MaintenanceConfig::default();
        let merged = merge_explorer_ids(
            vec![
                "peter".to_string(),
                "cole".to_string(),
                "peter".to_string(),
                "staging".to_string(),
                String::new(),
            ],
            &settings,
        );
        assert_eq!(merged, vec!["cole", "peter"]);

        let fallback = merge_explorer_ids(Vec::new(), &settings);
        assert_eq!(fallback, settings.fallback_explorer_ids);
    }

    #[test]
    fn test_explorer_prefixes() {
        let prefixes = explorer_prefixes(
            &["cole".to_string()],
            &[UploadDirection::To, UploadDirection::From],
        );
        assert_eq!(prefixes, vec!["cole/to/", "cole/from/"]);
    }

    #[tokio::test]
    async fn test_resolve_prefixes_discovers_explorers() {
        let store = MemoryObjectStore::new("bucket");
        store.insert("ana/to/1/image.jpg", vec![0; 4]);
        store.insert("assets/voice-samples/a.mp3", vec![0; 4]);
        store.insert("staging/x.jpg", vec![0; 4]);

        let settings = MaintenanceConfig::default();
        let prefixes = resolve_prefixes(&store, &settings, &[], &[UploadDirection::To]).await;
        assert_eq!(prefixes, vec!["ana/to/"]);

        let explicit = resolve_prefixes(
            &store,
            &settings,
            &["peter/from/".to_string()],
            &[UploadDirection::To],
        )
        .await;
        assert_eq!(explicit, vec!["peter/from/"]);
    }
}
