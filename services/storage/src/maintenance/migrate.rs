//! v1 → v2 migration.
//!
//! v1 kept a single explorer's data under a fixed prefix and project. v2
//! namespaces everything by explorer id. Reflections and responses are copied
//! into the v2 project with `explorerId` rewritten, and bundle objects are
//! copied into the v2 bucket under the new explorer prefix. Documents that
//! already exist in v2 are left alone, so the job can be re-run.

use super::{log_preview, RunMode, REFLECTIONS_COLLECTION, RESPONSES_COLLECTION};
use crate::config::MigrationConfig;
use crate::firestore::{commit_in_batches, Document, DocumentStore, FieldValue, Write};
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use reflections_shared::keys;
use reflections_shared::models::{
    DEPRECATED_REFLECTION_FIELDS, FIELD_EVENT_ID, FIELD_EXPLORER_ID, FIELD_STATUS, STATUS_DELETED,
};
use reflections_shared::UploadDirection;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, instrument, warn};

/// One object copy from the v1 bucket into the v2 bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCopy {
    pub source_key: String,
    pub dest_key: String,
}

impl fmt::Display for ObjectCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_key, self.dest_key)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    /// Already rewritten for v2
    pub reflections: Vec<Document>,
    pub responses: Vec<Document>,
    pub orphans_missing: usize,
    pub orphans_deleted: usize,
    pub copies: Vec<ObjectCopy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryReport {
    pub planned: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for CategoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "migrated {}, skipped (exists) {}, errors {}",
            self.migrated, self.skipped, self.errors
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub source_reflections: usize,
    pub source_responses: usize,
    pub orphans_missing: usize,
    pub orphans_deleted: usize,
    pub reflections: CategoryReport,
    pub responses: CategoryReport,
    pub objects: CategoryReport,
}

/// A v1 document belongs to the migrated explorer when its `explorerId`
/// matches the v1 prefix (any case) or is absent.
pub fn belongs_to_source(document: &Document, source_prefix: &str) -> bool {
    match document.fields.get(FIELD_EXPLORER_ID) {
        None => true,
        Some(FieldValue::StringValue(id)) => id.is_empty() || id.eq_ignore_ascii_case(source_prefix),
        Some(FieldValue::NullValue(())) => true,
        Some(_) => false,
    }
}

fn is_deleted(document: &Document) -> bool {
    document.str_field(FIELD_STATUS) == Some(STATUS_DELETED)
}

/// v2 shape of a reflection: new explorer, `event_id` defaulted, deprecated
/// fields dropped
pub fn rewrite_reflection(document: &Document, target_explorer_id: &str) -> Document {
    let mut rewritten = document.clone();
    rewritten
        .fields
        .insert(FIELD_EXPLORER_ID.to_string(), FieldValue::string(target_explorer_id));

    let has_event_id = rewritten
        .str_field(FIELD_EVENT_ID)
        .map(|id| !id.is_empty())
        .unwrap_or(false);
    if !has_event_id {
        rewritten
            .fields
            .insert(FIELD_EVENT_ID.to_string(), FieldValue::string(&document.id));
    }

    for field in DEPRECATED_REFLECTION_FIELDS {
        rewritten.fields.remove(field);
    }
    rewritten
}

pub fn rewrite_response(document: &Document, target_explorer_id: &str) -> Document {
    let mut rewritten = document.clone();
    rewritten
        .fields
        .insert(FIELD_EXPLORER_ID.to_string(), FieldValue::string(target_explorer_id));
    rewritten
}

/// Plan the Firestore side from full v1 collection listings.
pub fn plan_documents(
    reflections: &[Document],
    responses: &[Document],
    config: &MigrationConfig,
) -> MigrationPlan {
    let source: Vec<&Document> = reflections
        .iter()
        .filter(|d| belongs_to_source(d, &config.source_prefix))
        .collect();
    let status_by_id: HashMap<&str, bool> = source
        .iter()
        .map(|d| (d.id.as_str(), is_deleted(d)))
        .collect();

    let mut plan = MigrationPlan {
        reflections: source
            .iter()
            .filter(|d| !is_deleted(d))
            .map(|d| rewrite_reflection(d, &config.target_explorer_id))
            .collect(),
        ..MigrationPlan::default()
    };

    for response in responses
        .iter()
        .filter(|d| belongs_to_source(d, &config.source_prefix))
    {
        match status_by_id.get(response.id.as_str()) {
            None => plan.orphans_missing += 1,
            Some(true) => plan.orphans_deleted += 1,
            Some(false) => plan
                .responses
                .push(rewrite_response(response, &config.target_explorer_id)),
        }
    }

    plan
}

/// Object copies with the leading v1 prefix replaced by the v2 explorer id.
pub fn plan_copies(source_keys: &[String], config: &MigrationConfig) -> Vec<ObjectCopy> {
    source_keys
        .iter()
        .filter_map(|key| {
            keys::replace_leading_segment(key, &config.source_prefix, &config.target_explorer_id)
                .map(|dest_key| ObjectCopy {
                    source_key: key.clone(),
                    dest_key,
                })
        })
        .collect()
}

pub struct MigrationJob<'a> {
    source_docs: &'a dyn DocumentStore,
    target_docs: &'a dyn DocumentStore,
    source_store: &'a dyn ObjectStore,
    target_store: &'a dyn ObjectStore,
    config: &'a MigrationConfig,
    preview_limit: usize,
}

impl<'a> MigrationJob<'a> {
    pub fn new(
        source_docs: &'a dyn DocumentStore,
        target_docs: &'a dyn DocumentStore,
        source_store: &'a dyn ObjectStore,
        target_store: &'a dyn ObjectStore,
        config: &'a MigrationConfig,
    ) -> Self {
        Self {
            source_docs,
            target_docs,
            source_store,
            target_store,
            config,
            preview_limit: 10,
        }
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    #[instrument(skip(self), fields(source = %self.config.source_prefix, target = %self.config.target_explorer_id))]
    pub async fn run(&self, mode: RunMode) -> Result<MigrationReport> {
        let reflections = self
            .source_docs
            .list(REFLECTIONS_COLLECTION)
            .await
            .context("Failed to list v1 reflections")?;
        let responses = self
            .source_docs
            .list(RESPONSES_COLLECTION)
            .await
            .context("Failed to list v1 responses")?;

        let mut plan = plan_documents(&reflections, &responses, self.config);

        let mut source_keys = Vec::new();
        for direction in [UploadDirection::To, UploadDirection::From] {
            let prefix = keys::direction_prefix(&self.config.source_prefix, direction);
            let objects = self
                .source_store
                .list(&prefix)
                .await
                .with_context(|| format!("Failed to list v1 {}", prefix))?;
            info!(prefix = %prefix, objects = objects.len(), "Listed v1 objects");
            source_keys.extend(objects.into_iter().map(|o| o.key));
        }
        plan.copies = plan_copies(&source_keys, self.config);

        let mut report = MigrationReport {
            dry_run: mode.is_dry_run(),
            source_reflections: reflections.len(),
            source_responses: responses.len(),
            orphans_missing: plan.orphans_missing,
            orphans_deleted: plan.orphans_deleted,
            reflections: CategoryReport {
                planned: plan.reflections.len(),
                ..CategoryReport::default()
            },
            responses: CategoryReport {
                planned: plan.responses.len(),
                ..CategoryReport::default()
            },
            objects: CategoryReport {
                planned: plan.copies.len(),
                ..CategoryReport::default()
            },
        };

        info!(
            reflections = report.reflections.planned,
            responses = report.responses.planned,
            objects = report.objects.planned,
            orphans_missing = report.orphans_missing,
            orphans_deleted = report.orphans_deleted,
            dry_run = report.dry_run,
            "Migration plan ready"
        );

        let reflection_ids: Vec<&str> = plan.reflections.iter().map(|d| d.id.as_str()).collect();
        let response_ids: Vec<&str> = plan.responses.iter().map(|d| d.id.as_str()).collect();
        log_preview("Reflections to migrate", &reflection_ids, self.preview_limit);
        log_preview("Responses to migrate", &response_ids, self.preview_limit);
        log_preview("Objects to copy", &plan.copies, self.preview_limit);

        if mode.is_dry_run() {
            info!("Dry run, no changes made");
            return Ok(report);
        }

        report.reflections = self
            .migrate_documents(REFLECTIONS_COLLECTION, plan.reflections, report.reflections)
            .await;
        info!(result = %report.reflections, "Reflections migrated");

        report.responses = self
            .migrate_documents(RESPONSES_COLLECTION, plan.responses, report.responses)
            .await;
        info!(result = %report.responses, "Responses migrated");

        let source_bucket = self.source_store.bucket();
        for copy in &plan.copies {
            match self
                .target_store
                .copy_from(&source_bucket, &copy.source_key, &copy.dest_key)
                .await
            {
                Ok(()) => report.objects.migrated += 1,
                Err(e) => {
                    warn!(key = %copy.source_key, error = %e, "Object copy failed");
                    report.objects.errors += 1;
                }
            }
        }
        info!(result = %report.objects, "Objects migrated");

        Ok(report)
    }

    async fn migrate_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
        mut report: CategoryReport,
    ) -> CategoryReport {
        let mut writes = Vec::new();
        for document in documents {
            match self.target_docs.get(collection, &document.id).await {
                Ok(Some(_)) => report.skipped += 1,
                Ok(None) => writes.push(Write::Set {
                    collection: collection.to_string(),
                    document,
                }),
                Err(e) => {
                    warn!(collection, id = %document.id, error = %e, "Existence check failed");
                    report.errors += 1;
                }
            }
        }

        let outcome = commit_in_batches(self.target_docs, writes).await;
        report.migrated += outcome.committed;
        report.errors += outcome.failed;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDocumentStore, MemoryObjectStore};
    use serde_json::json;

    fn config() -> MigrationConfig {
        MigrationConfig {
            source_bucket: "mirror-v1".to_string(),
            source_prefix: "cole".to_string(),
            target_explorer_id: "COLE-01052010".to_string(),
            ..MigrationConfig::default()
        }
    }

    fn doc(id: &str, fields: serde_json::Value) -> Document {
        Document::from_json(id, fields.as_object().unwrap())
    }

    #[test]
    fn test_belongs_to_source() {
        assert!(belongs_to_source(&doc("a", json!({ "explorerId": "Cole" })), "cole"));
        assert!(belongs_to_source(&doc("b", json!({ "explorerId": "" })), "cole"));
        assert!(belongs_to_source(&doc("c", json!({})), "cole"));
        assert!(!belongs_to_source(&doc("d", json!({ "explorerId": "peter" })), "cole"));
    }

    #[test]
    fn test_rewrite_reflection() {
        let original = doc(
            "r1",
            json!({ "explorerId": "cole", "audio_url": "x", "deep_dive_audio_url": "y", "description": "hi" }),
        );
        let rewritten = rewrite_reflection(&original, "COLE-01052010");

        assert_eq!(rewritten.str_field("explorerId"), Some("COLE-01052010"));
        assert_eq!(rewritten.str_field("event_id"), Some("r1"));
        assert_eq!(rewritten.str_field("description"), Some("hi"));
        assert!(!rewritten.fields.contains_key("audio_url"));
        assert!(!rewritten.fields.contains_key("deep_dive_audio_url"));

        let with_event = doc("r2", json!({ "event_id": "1700" }));
        assert_eq!(
            rewrite_reflection(&with_event, "X").str_field("event_id"),
            Some("1700")
        );
    }

    #[test]
    fn test_plan_documents_counts_orphans() {
        let reflections = vec![
            doc("r1", json!({ "explorerId": "cole" })),
            doc("r2", json!({ "explorerId": "cole", "status": "deleted" })),
            doc("p1", json!({ "explorerId": "peter" })),
        ];
        let responses = vec![
            doc("r1", json!({ "explorerId": "cole" })),
            doc("r2", json!({ "explorerId": "cole" })),
            doc("missing", json!({})),
            doc("p1", json!({ "explorerId": "peter" })),
        ];

        let plan = plan_documents(&reflections, &responses, &config());

        assert_eq!(plan.reflections.len(), 1);
        assert_eq!(plan.reflections[0].id, "r1");
        assert_eq!(plan.responses.len(), 1);
        assert_eq!(
            plan.responses[0].str_field("explorerId"),
            Some("COLE-01052010")
        );
        assert_eq!(plan.orphans_missing, 1);
        assert_eq!(plan.orphans_deleted, 1);
    }

    #[test]
    fn test_plan_copies_replaces_prefix() {
        let keys = vec![
            "cole/to/1/image.jpg".to_string(),
            "cole/from/2/image.jpg".to_string(),
            "colette/to/3/image.jpg".to_string(),
        ];
        let copies = plan_copies(&keys, &config());
        assert_eq!(
            copies,
            vec![
                ObjectCopy {
                    source_key: "cole/to/1/image.jpg".to_string(),
                    dest_key: "COLE-01052010/to/1/image.jpg".to_string(),
                },
                ObjectCopy {
                    source_key: "cole/from/2/image.jpg".to_string(),
                    dest_key: "COLE-01052010/from/2/image.jpg".to_string(),
                },
            ]
        );
    }

    struct World {
        v1_docs: MemoryDocumentStore,
        v2_docs: MemoryDocumentStore,
        v1_store: MemoryObjectStore,
        v2_store: MemoryObjectStore,
    }

    fn world() -> World {
        let v1_docs = MemoryDocumentStore::new();
        v1_docs.insert_json(REFLECTIONS_COLLECTION, "r1", json!({ "explorerId": "cole", "audio_url": "x" }));
        v1_docs.insert_json(REFLECTIONS_COLLECTION, "r2", json!({ "explorerId": "cole" }));
        v1_docs.insert_json(RESPONSES_COLLECTION, "r1", json!({ "explorerId": "cole", "response_event_id": "9" }));

        let v2_docs = MemoryDocumentStore::new();
        v2_docs.insert_json(REFLECTIONS_COLLECTION, "r2", json!({ "explorerId": "COLE-01052010", "edited": true }));

        let v1_store = MemoryObjectStore::new("mirror-v1");
        v1_store.insert("cole/to/1/image.jpg", vec![1, 2, 3]);
        v1_store.insert("cole/from/9/image.jpg", vec![4]);
        let v2_store = v1_store.sibling("reflections-v2");

        World {
            v1_docs,
            v2_docs,
            v1_store,
            v2_store,
        }
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let w = world();
        let config = config();
        let report = MigrationJob::new(&w.v1_docs, &w.v2_docs, &w.v1_store, &w.v2_store, &config)
            .run(RunMode::DryRun)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.reflections.planned, 2);
        assert_eq!(report.objects.planned, 2);
        assert_eq!(w.v2_docs.commit_count(), 0);
        assert!(w.v2_store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_execute_is_idempotent() {
        let w = world();
        let config = config();
        let job = MigrationJob::new(&w.v1_docs, &w.v2_docs, &w.v1_store, &w.v2_store, &config);

        let first = job.run(RunMode::Execute).await.unwrap();
        assert_eq!(first.reflections.migrated, 1);
        assert_eq!(first.reflections.skipped, 1);
        assert_eq!(first.responses.migrated, 1);
        assert_eq!(first.objects.migrated, 2);

        let r1 = w.v2_docs.document(REFLECTIONS_COLLECTION, "r1").unwrap();
        assert_eq!(r1.str_field("explorerId"), Some("COLE-01052010"));
        assert!(!r1.fields.contains_key("audio_url"));
        let r2 = w.v2_docs.document(REFLECTIONS_COLLECTION, "r2").unwrap();
        assert!(r2.fields.contains_key("edited"));
        assert_eq!(
            w.v2_store.object("COLE-01052010/to/1/image.jpg").unwrap().body,
            vec![1, 2, 3]
        );

        let second = job.run(RunMode::Execute).await.unwrap();
        assert_eq!(second.reflections.migrated, 0);
        assert_eq!(second.reflections.skipped, 2);
        assert_eq!(second.responses.skipped, 1);
    }
}
