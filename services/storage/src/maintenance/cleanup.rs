//! Orphaned response and selfie cleanup.
//!
//! A response is kept only while the reflection it answers exists and is not
//! soft-deleted. Selfie images under `{explorer}/from/` are kept only when a
//! kept response points at them. Reflections also lose their expired
//! presigned audio URL fields.

use super::{
    discover_explorer_prefixes, explorer_prefixes, log_preview, merge_explorer_ids, RunMode,
    REFLECTIONS_COLLECTION, RELATIONSHIPS_COLLECTION, RESPONSES_COLLECTION,
};
use crate::config::MaintenanceConfig;
use crate::firestore::{commit_in_batches, DocumentStore, Write};
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use reflections_shared::keys::{self, IMAGE_FILENAME};
use reflections_shared::{Reflection, Relationship, Response, UploadDirection};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::{info, instrument, warn};

/// Reflection whose deprecated fields will be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStrip {
    pub reflection_id: String,
    pub fields: Vec<&'static str>,
}

impl fmt::Display for FieldStrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reflection_id, self.fields.join(", "))
    }
}

/// Firestore side of the cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    /// Explorer ids seen in documents
    pub document_explorer_ids: BTreeSet<String>,
    pub strip_fields: Vec<FieldStrip>,
    pub unreferenced_responses: Vec<String>,
    pub valid_selfie_keys: BTreeSet<String>,
    pub valid_reflections: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub reflections: usize,
    pub valid_reflections: usize,
    pub responses: usize,
    pub explorers: Vec<String>,
    pub fields_to_strip: usize,
    pub fields_stripped: usize,
    pub unreferenced_responses: usize,
    pub responses_deleted: usize,
    pub selfies_scanned: usize,
    pub orphaned_selfies: usize,
    pub selfies_deleted: usize,
    pub errors: usize,
}

/// Plan the Firestore side from full collection listings.
pub fn plan_documents(
    reflections: &[Reflection],
    responses: &[Response],
    relationships: &[Relationship],
    default_explorer_id: &str,
) -> CleanupPlan {
    let valid_ids: HashSet<&str> = reflections
        .iter()
        .filter(|r| !r.is_deleted())
        .map(|r| r.id.as_str())
        .collect();

    let mut plan = CleanupPlan {
        valid_reflections: valid_ids.len(),
        ..CleanupPlan::default()
    };

    plan.document_explorer_ids.extend(
        reflections
            .iter()
            .filter_map(|r| r.explorer_id.clone())
            .chain(responses.iter().filter_map(|r| r.explorer_id.clone()))
            .chain(
                relationships
                    .iter()
                    .map(|r| r.explorer_id.clone())
                    .filter(|id| !id.is_empty()),
            ),
    );

    for response in responses {
        if !valid_ids.contains(response.id.as_str()) {
            plan.unreferenced_responses.push(response.id.clone());
            continue;
        }
        let explorer = response
            .explorer_id
            .as_deref()
            .unwrap_or(default_explorer_id);
        plan.valid_selfie_keys.insert(selfie_key(explorer, response.selfie_event_id()));
    }

    plan.strip_fields = reflections
        .iter()
        .filter_map(|r| {
            let fields = r.deprecated_fields();
            (!fields.is_empty()).then(|| FieldStrip {
                reflection_id: r.id.clone(),
                fields,
            })
        })
        .collect();

    plan
}

/// `{explorer}/from/{event_id}/image.jpg`
pub fn selfie_key(explorer_id: &str, event_id: &str) -> String {
    format!(
        "{}{}/{}",
        keys::direction_prefix(explorer_id, UploadDirection::From),
        event_id,
        IMAGE_FILENAME
    )
}

/// Selfie images no kept response references
pub fn find_orphaned_selfies(keys: &[String], valid: &BTreeSet<String>) -> Vec<String> {
    keys.iter()
        .filter(|key| key.ends_with(&format!("/{}", IMAGE_FILENAME)))
        .filter(|key| !valid.contains(*key))
        .cloned()
        .collect()
}

pub struct CleanupJob<'a> {
    docs: &'a dyn DocumentStore,
    store: &'a dyn ObjectStore,
    settings: &'a MaintenanceConfig,
}

impl<'a> CleanupJob<'a> {
    pub fn new(
        docs: &'a dyn DocumentStore,
        store: &'a dyn ObjectStore,
        settings: &'a MaintenanceConfig,
    ) -> Self {
        Self {
            docs,
            store,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, mode: RunMode) -> Result<CleanupReport> {
        let reflection_docs = self
            .docs
            .list(REFLECTIONS_COLLECTION)
            .await
            .context("Failed to list reflections")?;
        let response_docs = self
            .docs
            .list(RESPONSES_COLLECTION)
            .await
            .context("Failed to list responses")?;
        let relationship_docs = self
            .docs
            .list(RELATIONSHIPS_COLLECTION)
            .await
            .context("Failed to list relationships")?;

        let reflections: Vec<Reflection> = reflection_docs
            .iter()
            .map(|d| Reflection::from_fields(&d.id, &d.to_json()))
            .collect();
        let responses: Vec<Response> = response_docs
            .iter()
            .map(|d| Response::from_fields(&d.id, &d.to_json()))
            .collect();
        let relationships: Vec<Relationship> = relationship_docs
            .iter()
            .map(|d| Relationship::from_fields(&d.id, &d.to_json()))
            .collect();

        let plan = plan_documents(
            &reflections,
            &responses,
            &relationships,
            &self.settings.default_explorer_id,
        );

        let discovered = discover_explorer_prefixes(self.store, self.settings).await;
        let explorers = merge_explorer_ids(
            plan.document_explorer_ids.iter().cloned().chain(discovered),
            self.settings,
        );

        let mut selfie_keys = Vec::new();
        for prefix in explorer_prefixes(&explorers, &[UploadDirection::From]) {
            let objects = self
                .store
                .list(&prefix)
                .await
                .with_context(|| format!("Failed to list {}", prefix))?;
            selfie_keys.extend(objects.into_iter().map(|o| o.key));
        }
        let orphaned = find_orphaned_selfies(&selfie_keys, &plan.valid_selfie_keys);

        let mut report = CleanupReport {
            dry_run: mode.is_dry_run(),
            reflections: reflections.len(),
            valid_reflections: plan.valid_reflections,
            responses: responses.len(),
            explorers,
            fields_to_strip: plan.strip_fields.len(),
            unreferenced_responses: plan.unreferenced_responses.len(),
            selfies_scanned: selfie_keys.len(),
            orphaned_selfies: orphaned.len(),
            ..CleanupReport::default()
        };

        info!(
            reflections = report.reflections,
            valid_reflections = report.valid_reflections,
            responses = report.responses,
            explorers = ?report.explorers,
            dry_run = report.dry_run,
            "Cleanup plan ready"
        );

        let limit = self.settings.preview_limit;
        log_preview("Reflections with audio fields to strip", &plan.strip_fields, limit);
        log_preview(
            "Responses pointing to missing or deleted reflections",
            &plan.unreferenced_responses,
            limit,
        );
        log_preview("Orphaned selfie images", &orphaned, limit);

        if mode.is_dry_run() {
            info!("Dry run, no changes made");
            return Ok(report);
        }

        let strip_writes = plan
            .strip_fields
            .iter()
            .map(|s| Write::DeleteFields {
                collection: REFLECTIONS_COLLECTION.to_string(),
                id: s.reflection_id.clone(),
                fields: s.fields.iter().map(|f| f.to_string()).collect(),
            })
            .collect();
        let outcome = commit_in_batches(self.docs, strip_writes).await;
        report.fields_stripped = outcome.committed;
        report.errors += outcome.failed;

        let delete_writes = plan
            .unreferenced_responses
            .iter()
            .map(|id| Write::Delete {
                collection: RESPONSES_COLLECTION.to_string(),
                id: id.clone(),
            })
            .collect();
        let outcome = commit_in_batches(self.docs, delete_writes).await;
        report.responses_deleted = outcome.committed;
        report.errors += outcome.failed;

        for key in &orphaned {
            match self.store.delete(key).await {
                Ok(()) => report.selfies_deleted += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete selfie");
                    report.errors += 1;
                }
            }
        }

        info!(
            fields_stripped = report.fields_stripped,
            responses_deleted = report.responses_deleted,
            selfies_deleted = report.selfies_deleted,
            errors = report.errors,
            "Cleanup finished"
        );

        Ok(report)
    }
}
