//! In-memory stores for job tests.

use crate::firestore::{Document, DocumentStore, DocumentStoreError, Write};
use crate::object_store::{ObjectStore, ObjectSummary, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

type Buckets = Arc<Mutex<BTreeMap<(String, String), StoredObject>>>;

/// Buckets sharing one backing map, so cross-bucket copies work
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Buckets,
    writes: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Arc::default(),
            writes: Arc::default(),
            failing: Arc::default(),
        }
    }

    pub fn sibling(&self, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ..self.clone()
        }
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().insert(
            (self.bucket.clone(), key.to_string()),
            StoredObject {
                body,
                content_type: reflections_shared::content_type_for(key).to_string(),
                cache_control: None,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(self.bucket.clone(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(bucket, _)| *bucket == self.bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Mutating calls in order, e.g. `put a/b.jpg`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Make every mutating call on `key` fail
    pub fn fail_on(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    fn record(&self, op: &str, key: &str) -> Result<(), StoreError> {
        if self.failing.lock().contains(key) {
            return Err(StoreError::Backend {
                operation: "memory",
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.writes.lock().push(format!("{} {}", op, key));
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> String {
        self.bucket.clone()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((bucket, key), _)| *bucket == self.bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectSummary::new(key.clone(), object.body.len() as u64))
            .collect())
    }

    async fn list_prefixes(&self, delimiter: &str) -> Result<Vec<String>, StoreError> {
        let prefixes: BTreeSet<String> = self
            .keys()
            .iter()
            .filter_map(|key| key.split_once(delimiter).map(|(first, _)| first.to_string()))
            .collect();
        Ok(prefixes.into_iter().collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.object(key)
            .map(|o| o.body)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: Option<String>,
    ) -> Result<(), StoreError> {
        self.record("put", key)?;
        self.objects.lock().insert(
            (self.bucket.clone(), key.to_string()),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                cache_control,
            },
        );
        Ok(())
    }

    async fn copy_from(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> Result<(), StoreError> {
        self.record("copy", dest_key)?;
        let mut objects = self.objects.lock();
        let source = objects
            .get(&(source_bucket.to_string(), source_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(source_key.to_string()))?;
        objects.insert((self.bucket.clone(), dest_key.to_string()), source);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record("delete", key)?;
        self.objects
            .lock()
            .remove(&(self.bucket.clone(), key.to_string()));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.object(key).is_some())
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> Result<String, StoreError> {
        Ok(format!("memory://{}/{}", self.bucket, key))
    }

    async fn presign_put(&self, key: &str, _expires_in: Duration) -> Result<String, StoreError> {
        Ok(format!("memory://{}/{}", self.bucket, key))
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
    commits: Mutex<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, document: Document) {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document);
    }

    /// Insert a document from plain JSON fields
    pub fn insert_json(&self, collection: &str, id: &str, fields: serde_json::Value) {
        let fields = fields.as_object().cloned().unwrap_or_default();
        self.insert(collection, Document::from_json(id, &fields));
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .lock()
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn commit_count(&self) -> usize {
        *self.commits.lock()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, DocumentStoreError> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        Ok(self.document(collection, id))
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), DocumentStoreError> {
        *self.commits.lock() += 1;
        let mut collections = self.collections.lock();
        for write in writes {
            match write {
                Write::Set {
                    collection,
                    document,
                } => {
                    collections
                        .entry(collection)
                        .or_default()
                        .insert(document.id.clone(), document);
                }
                Write::Delete { collection, id } => {
                    if let Some(docs) = collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
                Write::DeleteFields {
                    collection,
                    id,
                    fields,
                } => {
                    if let Some(doc) = collections.get_mut(&collection).and_then(|d| d.get_mut(&id)) {
                        for field in &fields {
                            doc.fields.remove(field);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
