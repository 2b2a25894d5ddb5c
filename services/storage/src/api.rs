//! Signed-URL HTTP API.
//!
//! Clients never talk to the bucket with credentials. They ask this service
//! for presigned PUT/GET URLs and list event bundles through it.

use crate::config::{ApiConfig, Config};
use crate::object_store::{ObjectStore, StoreError};
use crate::unsplash::{UnsplashClient, UnsplashError};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use futures::future::try_join_all;
use reflections_shared::keys::{
    self, AUDIO_FILENAME, IMAGE_FILENAME, METADATA_FILENAME, VIDEO_FILENAME,
};
use reflections_shared::{
    BatchUploadUrlsResponse, Event, KeyError, ListEventsResponse, ListPhotosResponse,
    SignedUrlResponse, UploadDirection,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Per-request settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub default_explorer_id: String,
    pub max_batch_files: usize,
    pub presigned_url_expiry: Duration,
    pub voice_sample_expiry: Duration,
    pub voice_samples: HashSet<String>,
}

impl ApiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_explorer_id: config.api.default_explorer_id.clone(),
            max_batch_files: config.api.max_batch_files,
            presigned_url_expiry: config.presigned_url_expiry(),
            voice_sample_expiry: config.voice_sample_expiry(),
            voice_samples: config.api.voice_samples.iter().cloned().collect(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub unsplash: Arc<UnsplashClient>,
    pub settings: Arc<ApiSettings>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            ApiError::Store(_) => "STORAGE_ERROR",
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(e: KeyError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<UnsplashError> for ApiError {
    fn from(e: UnsplashError) -> Self {
        match e {
            UnsplashError::MissingKey => ApiError::Config(e.to_string()),
            UnsplashError::EmptyQuery => ApiError::BadRequest(e.to_string()),
            UnsplashError::Request(_) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

/// Query for a single signed URL
#[derive(Debug, Default, Deserialize)]
pub struct SignedUrlQuery {
    pub path: Option<String>,
    pub event_id: Option<String>,
    pub filename: Option<String>,
    pub explorer_id: Option<String>,
    #[serde(rename = "explorerId")]
    pub explorer_id_camel: Option<String>,
    /// `GET` signs a download; anything else signs an upload
    pub method: Option<String>,
}

/// Batch request as query parameters, `files` comma separated
#[derive(Debug, Default, Deserialize)]
pub struct BatchUploadQuery {
    pub explorer_id: Option<String>,
    #[serde(rename = "explorerId")]
    pub explorer_id_camel: Option<String>,
    pub path: Option<String>,
    pub event_id: Option<String>,
    pub files: Option<String>,
}

/// Batch request as a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct BatchUploadBody {
    #[serde(alias = "explorerId")]
    pub explorer_id: Option<String>,
    pub path: Option<String>,
    pub event_id: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl From<BatchUploadQuery> for BatchUploadBody {
    fn from(query: BatchUploadQuery) -> Self {
        Self {
            explorer_id: non_empty(query.explorer_id).or(query.explorer_id_camel),
            path: query.path,
            event_id: query.event_id,
            files: query
                .files
                .map(|files| {
                    files
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Query for listing and deleting under an explorer inbox
#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    pub explorer_id: Option<String>,
    #[serde(rename = "explorerId")]
    pub explorer_id_camel: Option<String>,
    pub path: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceSampleQuery {
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteEventResponse {
    pub event_id: String,
    pub deleted: usize,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE]);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/get-s3-url", get(get_signed_url))
        .route(
            "/get-batch-s3-upload-urls",
            get(batch_upload_urls_query).post(batch_upload_urls_body),
        )
        .route("/list-mirror-events", get(list_events))
        .route("/list-mirror-photos", get(list_photos))
        .route(
            "/delete-mirror-event",
            delete(delete_event).post(delete_event),
        )
        .route("/get-voice-sample", get(get_voice_sample))
        .route("/unsplash-search", get(unsplash_search))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "reflections-storage"
    }))
}

/// Presigned URL for one object: an event bundle file, or a legacy photo
#[instrument(skip(state))]
async fn get_signed_url(
    State(state): State<AppState>,
    Query(params): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let explorer = resolve_explorer(&state.settings, params.explorer_id, params.explorer_id_camel);
    let direction = UploadDirection::parse_lenient(params.path.as_deref());

    let key = match (non_empty(params.event_id), non_empty(params.filename)) {
        (Some(event_id), Some(filename)) => {
            keys::event_object_key(&explorer, direction, &event_id, &filename)?
        }
        _ => keys::legacy_photo_key(&explorer, direction, Utc::now().timestamp()),
    };

    let expiry = state.settings.presigned_url_expiry;
    let url = match params.method.as_deref() {
        Some(m) if m.eq_ignore_ascii_case("GET") => state.store.presign_get(&key, expiry).await?,
        _ => state.store.presign_put(&key, expiry).await?,
    };

    metrics::counter!("storage.presign.issued").increment(1);
    debug!(key = %key, "Issued presigned URL");

    Ok(Json(SignedUrlResponse { url }))
}

async fn batch_upload_urls_query(
    State(state): State<AppState>,
    Query(params): Query<BatchUploadQuery>,
) -> Result<Json<BatchUploadUrlsResponse>, ApiError> {
    batch_upload_urls(&state, params.into()).await.map(Json)
}

async fn batch_upload_urls_body(
    State(state): State<AppState>,
    Json(body): Json<BatchUploadBody>,
) -> Result<Json<BatchUploadUrlsResponse>, ApiError> {
    batch_upload_urls(&state, body).await.map(Json)
}

/// Presigned PUT URLs for every file of one event bundle
#[instrument(skip(state))]
async fn batch_upload_urls(
    state: &AppState,
    request: BatchUploadBody,
) -> Result<BatchUploadUrlsResponse, ApiError> {
    let explorer = resolve_explorer(&state.settings, request.explorer_id, None);
    let direction = UploadDirection::parse_lenient(request.path.as_deref());
    let event_id = non_empty(request.event_id).unwrap_or_else(|| Uuid::new_v4().to_string());

    let files = if request.files.is_empty() {
        vec![IMAGE_FILENAME.to_string(), METADATA_FILENAME.to_string()]
    } else {
        request.files
    };
    if files.len() > state.settings.max_batch_files {
        return Err(ApiError::BadRequest(format!(
            "Maximum {} files per batch",
            state.settings.max_batch_files
        )));
    }

    let object_keys = files
        .iter()
        .map(|filename| keys::event_object_key(&explorer, direction, &event_id, filename))
        .collect::<Result<Vec<_>, _>>()?;
    let signed = try_join_all(
        object_keys
            .iter()
            .map(|key| state.store.presign_put(key, state.settings.presigned_url_expiry)),
    )
    .await?;
    let urls: BTreeMap<String, String> = files.into_iter().zip(signed).collect();

    metrics::counter!("storage.presign.issued").increment(urls.len() as u64);
    info!(explorer = %explorer, event_id = %event_id, files = urls.len(), "Issued batch upload URLs");

    Ok(BatchUploadUrlsResponse { event_id, urls })
}

/// Event bundles under an explorer inbox with presigned GET URLs
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<InboxQuery>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let explorer = resolve_explorer(&state.settings, params.explorer_id, params.explorer_id_camel);
    let prefix = keys::direction_prefix(&explorer, inbox_direction(params.path.as_deref()));
    let expiry = state.settings.presigned_url_expiry;

    let objects = state.store.list(&prefix).await?;
    let mut events: BTreeMap<String, Event> = BTreeMap::new();

    for object in &objects {
        let Some((event_id, filename)) = keys::parse_event_key(&prefix, &object.key) else {
            if !is_legacy_photo(&prefix, &object.key) {
                warn!(key = %object.key, "Unexpected path structure");
            }
            continue;
        };

        let event = events
            .entry(event_id.to_string())
            .or_insert_with(|| Event::new(event_id));

        if !matches!(
            filename,
            IMAGE_FILENAME | METADATA_FILENAME | AUDIO_FILENAME | VIDEO_FILENAME
        ) {
            continue;
        }

        let url = match state.store.presign_get(&object.key, expiry).await {
            Ok(url) => url,
            Err(e) => {
                warn!(key = %object.key, error = %e, "Failed to presign object");
                continue;
            }
        };

        match filename {
            IMAGE_FILENAME => event.image_url = url,
            METADATA_FILENAME => event.metadata_url = url,
            AUDIO_FILENAME => event.audio_url = Some(url),
            VIDEO_FILENAME => event.video_url = Some(url),
            _ => {}
        }
    }

    let mut events: Vec<Event> = events.into_values().collect();
    events.sort_by(|a, b| compare_event_ids(&b.event_id, &a.event_id));

    metrics::counter!("storage.events.listed").increment(events.len() as u64);
    debug!(prefix = %prefix, events = events.len(), "Listed events");

    Ok(Json(ListEventsResponse { events }))
}

/// Legacy single photos directly under the inbox, newest first
#[instrument(skip(state))]
async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<InboxQuery>,
) -> Result<Json<ListPhotosResponse>, ApiError> {
    let explorer = resolve_explorer(&state.settings, params.explorer_id, params.explorer_id_camel);
    let prefix = keys::direction_prefix(&explorer, inbox_direction(params.path.as_deref()));

    let mut photos: Vec<_> = state
        .store
        .list(&prefix)
        .await?
        .into_iter()
        .filter(|o| is_legacy_photo(&prefix, &o.key))
        .collect();
    photos.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });

    let mut objects = Vec::with_capacity(photos.len());
    for photo in photos {
        match state
            .store
            .presign_get(&photo.key, state.settings.presigned_url_expiry)
            .await
        {
            Ok(url) => objects.push(url),
            Err(e) => warn!(key = %photo.key, error = %e, "Failed to presign photo"),
        }
    }

    Ok(Json(ListPhotosResponse { objects }))
}

/// Delete every object of one event bundle
#[instrument(skip(state))]
async fn delete_event(
    State(state): State<AppState>,
    Query(params): Query<InboxQuery>,
) -> Result<Json<DeleteEventResponse>, ApiError> {
    let event_id = non_empty(params.event_id)
        .ok_or_else(|| ApiError::BadRequest("event_id is required".to_string()))?;
    let explorer = resolve_explorer(&state.settings, params.explorer_id, params.explorer_id_camel);
    let folder = keys::event_folder_prefix(
        &explorer,
        inbox_direction(params.path.as_deref()),
        &event_id,
    )?;

    let objects = state.store.list(&folder).await?;
    try_join_all(objects.iter().map(|object| state.store.delete(&object.key))).await?;

    metrics::counter!("storage.objects.deleted").increment(objects.len() as u64);
    info!(folder = %folder, deleted = objects.len(), "Deleted event");

    Ok(Json(DeleteEventResponse {
        event_id,
        deleted: objects.len(),
    }))
}

/// Presigned GET for a voice preview sample
#[instrument(skip(state))]
async fn get_voice_sample(
    State(state): State<AppState>,
    Query(params): Query<VoiceSampleQuery>,
) -> Result<Json<SignedUrlResponse>, ApiError> {
    let voice = params
        .voice
        .filter(|v| state.settings.voice_samples.contains(v))
        .ok_or_else(|| ApiError::BadRequest("invalid or missing voice parameter".to_string()))?;

    let url = state
        .store
        .presign_get(&keys::voice_sample_key(&voice), state.settings.voice_sample_expiry)
        .await?;

    metrics::counter!("storage.presign.issued").increment(1);
    Ok(Json(SignedUrlResponse { url }))
}

/// Proxy an Unsplash search, piping the upstream status and body back
#[instrument(skip(state))]
async fn unsplash_search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let upstream = state
        .unsplash
        .search(params.query.as_deref().unwrap_or_default())
        .await?;

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((
        status,
        [(header::CONTENT_TYPE, "application/json")],
        upstream.body,
    )
        .into_response())
}

/// First non-empty explorer id, else the configured default; sanitized
fn resolve_explorer(
    settings: &ApiSettings,
    explorer_id: Option<String>,
    explorer_id_camel: Option<String>,
) -> String {
    let explorer = non_empty(explorer_id)
        .or_else(|| non_empty(explorer_id_camel))
        .unwrap_or_else(|| settings.default_explorer_id.clone());
    keys::sanitize_path_component(&explorer)
}

/// Inbox listings default to `to`
fn inbox_direction(path: Option<&str>) -> UploadDirection {
    match path {
        Some("from") => UploadDirection::From,
        _ => UploadDirection::To,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `{prefix}{name}.jpg` with no further path segments
fn is_legacy_photo(prefix: &str, key: &str) -> bool {
    key.strip_prefix(prefix)
        .map(|name| !name.contains('/') && name.len() > 4 && name.ends_with(".jpg"))
        .unwrap_or(false)
}

/// Millisecond ids compare numerically when their lengths differ
fn compare_event_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Start the signed URL API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting signed URL API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::test_config, UnsplashConfig};
    use crate::object_store::{MockObjectStore, ObjectSummary};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(store: MockObjectStore) -> Router {
        let config = test_config();
        let state = AppState {
            store: Arc::new(store),
            unsplash: Arc::new(UnsplashClient::new(&UnsplashConfig::default()).unwrap()),
            settings: Arc::new(ApiSettings::from_config(&config)),
        };
        create_router(state, &config.api)
    }

    fn signing_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_presign_put()
            .returning(|key, _| Ok(format!("https://signed.example/put/{}", key)));
        store
            .expect_presign_get()
            .returning(|key, _| Ok(format!("https://signed.example/get/{}", key)));
        store
    }

    async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .expect("failed to build request"),
            )
            .await
            .expect("request failed");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let (status, body) = send(app, "GET", uri, Body::empty()).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body): (_, serde_json::Value) =
            get_json(app(MockObjectStore::new()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_signed_url_for_event_bundle() {
        let (status, body): (_, SignedUrlResponse) = get_json(
            app(signing_store()),
            "/get-s3-url?path=to&explorer_id=peter&event_id=1700000000000&filename=image.jpg",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.url, "https://signed.example/put/peter/to/1700000000000/image.jpg");
    }

    #[tokio::test]
    async fn test_signed_url_invalid_path_defaults_to_from() {
        let (_, body): (_, SignedUrlResponse) = get_json(
            app(signing_store()),
            "/get-s3-url?path=sideways&explorerId=cole&event_id=42&filename=image.jpg",
        )
        .await;
        assert_eq!(body.url, "https://signed.example/put/cole/from/42/image.jpg");
    }

    #[tokio::test]
    async fn test_signed_url_legacy_photo_and_get_method() {
        let (_, body): (_, SignedUrlResponse) =
            get_json(app(signing_store()), "/get-s3-url?path=to").await;
        assert!(body.url.starts_with("https://signed.example/put/cole/to/"));
        assert!(body.url.ends_with(".jpg"));

        let (_, body): (_, SignedUrlResponse) = get_json(
            app(signing_store()),
            "/get-s3-url?path=to&event_id=42&filename=metadata.json&method=GET",
        )
        .await;
        assert_eq!(body.url, "https://signed.example/get/cole/to/42/metadata.json");
    }

    #[tokio::test]
    async fn test_signed_url_rejects_traversal_filename() {
        let (status, body): (_, ErrorResponse) = get_json(
            app(signing_store()),
            "/get-s3-url?path=to&event_id=42&filename=..%2Fsecret",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_batch_urls_default_files() {
        let (status, body): (_, BatchUploadUrlsResponse) = get_json(
            app(signing_store()),
            "/get-batch-s3-upload-urls?explorer_id=cole&path=to",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(Uuid::parse_str(&body.event_id).is_ok());
        assert_eq!(body.urls.len(), 2);
        assert!(body.urls["image.jpg"].ends_with(&format!("/{}/image.jpg", body.event_id)));
        assert!(body.urls.contains_key("metadata.json"));
    }

    #[tokio::test]
    async fn test_batch_urls_post_body() {
        let request = serde_json::json!({
            "explorer_id": "cole",
            "event_id": "1700000000000",
            "path": "to",
            "files": ["video.mp4", "metadata.json"]
        });
        let (status, body) = send(
            app(signing_store()),
            "POST",
            "/get-batch-s3-upload-urls",
            Body::from(request.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let body: BatchUploadUrlsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.event_id, "1700000000000");
        assert_eq!(
            body.urls["video.mp4"],
            "https://signed.example/put/cole/to/1700000000000/video.mp4"
        );
    }

    #[tokio::test]
    async fn test_batch_urls_limit() {
        let files: Vec<String> = (0..11).map(|i| format!("f{}.jpg", i)).collect();
        let (status, _): (_, ErrorResponse) = get_json(
            app(signing_store()),
            &format!("/get-batch-s3-upload-urls?files={}", files.join(",")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_events_groups_and_sorts() {
        let mut store = signing_store();
        store.expect_list().returning(|prefix| {
            assert_eq!(prefix, "cole/to/");
            Ok(vec![
                ObjectSummary::new("cole/to/999/image.jpg", 10),
                ObjectSummary::new("cole/to/1700000000000/image.jpg", 10),
                ObjectSummary::new("cole/to/1700000000000/metadata.json", 1),
                ObjectSummary::new("cole/to/1700000000000/video.mp4", 100),
                ObjectSummary::new("cole/to/1700000000000/image_original.jpg", 10),
                ObjectSummary::new("cole/to/1690000000.jpg", 10),
                ObjectSummary::new("cole/to/a/b/c.jpg", 10),
            ])
        });

        let (status, body): (_, ListEventsResponse) =
            get_json(app(store), "/list-mirror-events?explorer_id=cole").await;
        assert_eq!(status, StatusCode::OK);

        let ids: Vec<_> = body.events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["1700000000000", "999"]);

        let newest = &body.events[0];
        assert_eq!(
            newest.image_url,
            "https://signed.example/get/cole/to/1700000000000/image.jpg"
        );
        assert!(newest.metadata_url.ends_with("/metadata.json"));
        assert!(newest.video_url.is_some());
        assert!(newest.audio_url.is_none());
        assert_eq!(body.events[1].metadata_url, "");
    }

    #[tokio::test]
    async fn test_list_events_skips_failed_presign() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|_| {
            Ok(vec![
                ObjectSummary::new("cole/to/5/image.jpg", 10),
                ObjectSummary::new("cole/to/5/metadata.json", 1),
            ])
        });
        store.expect_presign_get().returning(|key, _| {
            if key.ends_with("image.jpg") {
                Err(StoreError::Presign("boom".to_string()))
            } else {
                Ok("https://signed.example/meta".to_string())
            }
        });

        let (status, body): (_, ListEventsResponse) =
            get_json(app(store), "/list-mirror-events").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.events.len(), 1);
        assert_eq!(body.events[0].image_url, "");
        assert_eq!(body.events[0].metadata_url, "https://signed.example/meta");
    }

    #[tokio::test]
    async fn test_list_photos_only_legacy_keys() {
        let mut store = signing_store();
        store.expect_list().returning(|_| {
            Ok(vec![
                ObjectSummary::new("cole/to/1690000000.jpg", 10),
                ObjectSummary::new("cole/to/1690000500.jpg", 10),
                ObjectSummary::new("cole/to/1700000000000/image.jpg", 10),
            ])
        });

        let (_, body): (_, ListPhotosResponse) =
            get_json(app(store), "/list-mirror-photos?explorer_id=cole").await;
        assert_eq!(
            body.objects,
            vec![
                "https://signed.example/get/cole/to/1690000500.jpg",
                "https://signed.example/get/cole/to/1690000000.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_event() {
        let mut store = MockObjectStore::new();
        store.expect_list().returning(|prefix| {
            assert_eq!(prefix, "cole/to/42/");
            Ok(vec![
                ObjectSummary::new("cole/to/42/image.jpg", 10),
                ObjectSummary::new("cole/to/42/metadata.json", 1),
            ])
        });
        store.expect_delete().times(2).returning(|_| Ok(()));

        let (status, body) = send(
            app(store),
            "DELETE",
            "/delete-mirror-event?explorer_id=cole&event_id=42",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: DeleteEventResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.deleted, 2);
    }

    #[tokio::test]
    async fn test_delete_event_requires_event_id() {
        let (status, _) = send(
            app(MockObjectStore::new()),
            "POST",
            "/delete-mirror-event?explorer_id=cole",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_voice_sample_allowlist() {
        let (status, body): (_, SignedUrlResponse) = get_json(
            app(signing_store()),
            "/get-voice-sample?voice=en-US-Journey-O",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.url,
            "https://signed.example/get/assets/voice-samples/en-US-Journey-O.mp3"
        );

        let (status, _): (_, ErrorResponse) =
            get_json(app(signing_store()), "/get-voice-sample?voice=..%2Fsecret").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsplash_without_key_is_config_error() {
        let (status, body): (_, ErrorResponse) =
            get_json(app(MockObjectStore::new()), "/unsplash-search?query=dogs").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "CONFIG_ERROR");
    }

    #[test]
    fn test_compare_event_ids() {
        assert_eq!(compare_event_ids("999", "1700000000000"), Ordering::Less);
        assert_eq!(compare_event_ids("20", "10"), Ordering::Greater);
    }
}
