//! Reflections Storage Service
//!
//! Signed-URL API and operational jobs for the Reflections media bucket.
//! Clients never hold bucket credentials: they ask this service for short-lived
//! presigned URLs and move bytes directly to and from S3.
//!
//! ## Features
//!
//! - **Event bundles**: `{explorer}/{to|from}/{event_id}/` folders holding
//!   `image.jpg`, `metadata.json` and optional audio and video
//! - **Presigned URLs**: single and batch upload URLs, download URLs, voice
//!   samples
//! - **Inbox listing**: events grouped from a bucket listing, newest first
//! - **Unsplash proxy**: image search without exposing the access key
//! - **Maintenance**: orphan cleanup, v1 → v2 migration, image and video
//!   shrinking, all dry-run by default
//!
//! ## Layout
//!
//! ```text
//! mobile / web client
//!        │  GET /get-s3-url, /list-mirror-events, ...
//!        ▼
//! ┌──────────────┐   presign / list   ┌──────────────┐
//! │ api          │───────────────────▶│ object_store │──▶ S3
//! └──────────────┘                    └──────────────┘
//!        │                                   ▲
//!        ▼                                   │
//! ┌──────────────┐                    ┌──────────────┐
//! │ unsplash     │                    │ maintenance  │──▶ firestore
//! └──────────────┘                    └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod firestore;
pub mod maintenance;
pub mod object_store;
pub mod unsplash;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{create_router, start_api_server, ApiError, ApiSettings, AppState};
pub use config::Config;
pub use firestore::{Document, DocumentStore, FieldValue, FirestoreClient};
pub use maintenance::RunMode;
pub use object_store::{ObjectStore, ObjectSummary, S3ObjectStore, StoreError};
pub use unsplash::{UnsplashClient, UnsplashError};
