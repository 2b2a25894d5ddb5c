//! Reflections shared types
//!
//! Wire models exchanged between the Companion/Explorer clients and the
//! storage API, the Firestore record shapes used by the maintenance jobs, and
//! the object key layout of the media bucket.
//!
//! ## Bucket layout
//!
//! ```text
//! {explorerId}/
//!   to/                      companion -> explorer
//!     {eventId}/image.jpg
//!     {eventId}/metadata.json
//!     {eventId}/video.mp4
//!   from/                    explorer -> companion (selfie responses)
//!     {eventId}/image.jpg
//!     {unixSeconds}.jpg      legacy single photo
//! assets/voice-samples/{voice}.mp3
//! ```

pub mod keys;
pub mod models;

pub use keys::{content_type_for, sanitize_path_component, KeyError};
pub use models::{
    BatchUploadUrlsResponse, Event, EventMetadata, ListEventsResponse, ListPhotosResponse,
    MediaKind, MediaSource, PendingMedia, Reflection, Relationship, Response, SignedUrlResponse,
    UnsplashPhoto, UnsplashSearchResponse, UnsplashUrls, UploadDirection,
};
