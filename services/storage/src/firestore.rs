//! Firestore document access over the REST API.
//!
//! Documents carry Firestore's typed values ([`FieldValue`]) so a document
//! read from one project can be written to another without losing timestamp
//! or integer types. [`Document::to_json`] flattens them for the shared
//! record models.

use crate::config::FirestoreConfig;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Firestore rejects commits with more writes than this.
pub const MAX_BATCH_WRITES: usize = 500;

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("Firestore request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Firestore returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to read service account key {path}: {message}")]
    ServiceAccount { path: String, message: String },

    #[error("Failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Commit of {0} writes exceeds the batch limit")]
    TooManyWrites(usize),
}

/// Firestore typed value, in the REST wire shape (`{"stringValue": "..."}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    NullValue(()),
    BooleanValue(bool),
    /// int64 travels as a decimal string
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl FieldValue {
    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::StringValue(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::StringValue(s) => Some(s),
            _ => None,
        }
    }

    /// Plain JSON view. Timestamps, bytes and references become strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::NullValue(()) => Value::Null,
            FieldValue::BooleanValue(b) => Value::Bool(*b),
            FieldValue::IntegerValue(s) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
            FieldValue::DoubleValue(d) => json!(d),
            FieldValue::TimestampValue(s)
            | FieldValue::StringValue(s)
            | FieldValue::BytesValue(s)
            | FieldValue::ReferenceValue(s) => Value::String(s.clone()),
            FieldValue::GeoPointValue(v) => v.clone(),
            FieldValue::ArrayValue(array) => {
                Value::Array(array.values.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::MapValue(map) => Value::Object(
                map.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::NullValue(()),
            Value::Bool(b) => FieldValue::BooleanValue(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::IntegerValue(i.to_string()),
                None => FieldValue::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::StringValue(s.clone()),
            Value::Array(items) => FieldValue::ArrayValue(ArrayValue {
                values: items.iter().map(FieldValue::from_json).collect(),
            }),
            Value::Object(map) => FieldValue::MapValue(MapValue {
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            }),
        }
    }
}

/// A document id and its fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Build a document from plain JSON fields
    pub fn from_json(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }
}

/// One write inside an atomic commit
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or fully replace the document
    Set {
        collection: String,
        document: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Remove fields from an existing document
    DeleteFields {
        collection: String,
        id: String,
        fields: Vec<String>,
    },
}

impl Write {
    pub fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. }
            | Write::Delete { collection, .. }
            | Write::DeleteFields { collection, .. } => collection,
        }
    }
}

/// Outcome of [`commit_in_batches`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub committed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Document operations used by the maintenance jobs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in a collection, following page tokens.
    async fn list(&self, collection: &str) -> Result<Vec<Document>, DocumentStoreError>;

    async fn get(&self, collection: &str, id: &str)
        -> Result<Option<Document>, DocumentStoreError>;

    /// Atomic commit of at most [`MAX_BATCH_WRITES`] writes.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), DocumentStoreError>;
}

/// Commit `writes` in chunks of [`MAX_BATCH_WRITES`].
///
/// A failed chunk is counted and logged; later chunks still run.
pub async fn commit_in_batches(store: &dyn DocumentStore, writes: Vec<Write>) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (index, chunk) in writes.chunks(MAX_BATCH_WRITES).enumerate() {
        match store.commit(chunk.to_vec()).await {
            Ok(()) => {
                outcome.committed += chunk.len();
                debug!(batch = index + 1, writes = chunk.len(), "Batch committed");
            }
            Err(e) => {
                warn!(batch = index + 1, writes = chunk.len(), error = %e, "Batch commit failed");
                outcome.failed += chunk.len();
                outcome.errors.push(e.to_string());
            }
        }
    }

    outcome
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize, PartialEq)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl<'a> AssertionClaims<'a> {
    fn new(key: &'a ServiceAccountKey, issued_at: i64) -> Self {
        Self {
            iss: &key.client_email,
            scope: DATASTORE_SCOPE,
            aud: &key.token_uri,
            iat: issued_at,
            exp: issued_at + 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

enum TokenSource {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

#[derive(Debug, Deserialize)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl RawDocument {
    fn into_document(self) -> Document {
        let id = self.name.rsplit('/').next().unwrap_or_default().to_string();
        Document {
            id,
            fields: self.fields,
        }
    }
}

/// [`DocumentStore`] over the Firestore REST API
pub struct FirestoreClient {
    http: reqwest::Client,
    base_url: String,
    database_path: String,
    page_size: u32,
    tokens: TokenSource,
}

impl FirestoreClient {
    pub fn new(config: &FirestoreConfig) -> Result<Self, DocumentStoreError> {
        let tokens = match (&config.access_token, &config.service_account_path) {
            (Some(token), _) => TokenSource::Static(token.clone()),
            (None, Some(path)) => TokenSource::ServiceAccount {
                key: read_service_account(path)?,
                cached: Mutex::new(None),
            },
            (None, None) => TokenSource::Static(String::new()),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        info!(
            project_id = %config.project_id,
            database = %config.database,
            "Firestore client initialized"
        );

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            database_path: format!(
                "projects/{}/databases/{}",
                config.project_id, config.database
            ),
            page_size: config.page_size,
            tokens,
        })
    }

    fn documents_url(&self) -> String {
        format!("{}/{}/documents", self.base_url, self.database_path)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path, collection, id)
    }

    async fn access_token(&self) -> Result<String, DocumentStoreError> {
        match &self.tokens {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount { key, cached } => {
                let now = Instant::now();
                let cached_token = cached
                    .lock()
                    .as_ref()
                    .filter(|t| t.is_fresh(now))
                    .map(|t| t.token.clone());
                if let Some(token) = cached_token {
                    return Ok(token);
                }

                let fresh = self.exchange_assertion(key).await?;
                let token = fresh.token.clone();
                *cached.lock() = Some(fresh);
                Ok(token)
            }
        }
    }

    async fn exchange_assertion(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<CachedToken, DocumentStoreError> {
        let claims = AssertionClaims::new(key, chrono::Utc::now().timestamp());
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let response = check_status("token", response).await?;
        let token: TokenResponse = response.json().await?;

        debug!(expires_in = token.expires_in, "Exchanged service account assertion");
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    fn write_body(&self, write: &Write) -> Value {
        match write {
            Write::Set {
                collection,
                document,
            } => json!({
                "update": {
                    "name": self.document_name(collection, &document.id),
                    "fields": document.fields,
                }
            }),
            Write::Delete { collection, id } => json!({
                "delete": self.document_name(collection, id),
            }),
            Write::DeleteFields {
                collection,
                id,
                fields,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": {},
                },
                "updateMask": { "fieldPaths": fields },
                "currentDocument": { "exists": true },
            }),
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    #[instrument(skip(self))]
    async fn list(&self, collection: &str) -> Result<Vec<Document>, DocumentStoreError> {
        let url = format!("{}/{}", self.documents_url(), collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.access_token().await?;
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[("pageSize", self.page_size.to_string())]);
            if let Some(ref page) = page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let response = check_status("list", request.send().await?).await?;
            let page: ListDocumentsResponse = response.json().await?;

            documents.extend(page.documents.into_iter().map(RawDocument::into_document));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(collection = %collection, count = documents.len(), "Listed documents");
        Ok(documents)
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let url = format!("{}/{}/{}", self.documents_url(), collection, id);
        let token = self.access_token().await?;
        let response = self.http.get(&url).bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status("get", response).await?;
        let raw: RawDocument = response.json().await?;
        Ok(Some(raw.into_document()))
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn commit(&self, writes: Vec<Write>) -> Result<(), DocumentStoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        if writes.len() > MAX_BATCH_WRITES {
            return Err(DocumentStoreError::TooManyWrites(writes.len()));
        }

        let body = json!({
            "writes": writes.iter().map(|w| self.write_body(w)).collect::<Vec<_>>(),
        });

        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}:commit", self.documents_url()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        check_status("commit", response).await?;
        Ok(())
    }
}

fn read_service_account(path: &Path) -> Result<ServiceAccountKey, DocumentStoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| DocumentStoreError::ServiceAccount {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| DocumentStoreError::ServiceAccount {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

async fn check_status(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, DocumentStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DocumentStoreError::Status {
        operation,
        status: status.as_u16(),
        body,
    })
}
