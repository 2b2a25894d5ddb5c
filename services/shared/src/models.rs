use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Firestore field names shared by the reflection and response documents.
pub const FIELD_EXPLORER_ID: &str = "explorerId";
pub const FIELD_EVENT_ID: &str = "event_id";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_RESPONSE_EVENT_ID: &str = "response_event_id";
pub const FIELD_AUDIO_URL: &str = "audio_url";
pub const FIELD_DEEP_DIVE_AUDIO_URL: &str = "deep_dive_audio_url";

/// Fields dropped from reflection documents since presigned audio URLs expire.
pub const DEPRECATED_REFLECTION_FIELDS: [&str; 2] = [FIELD_AUDIO_URL, FIELD_DEEP_DIVE_AUDIO_URL];

/// Status value marking a soft-deleted reflection.
pub const STATUS_DELETED: &str = "deleted";

/// Kind of media a companion is sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Object filename inside an event bundle
    pub fn bundle_filename(&self) -> &'static str {
        match self {
            MediaKind::Photo => crate::keys::IMAGE_FILENAME,
            MediaKind::Video => crate::keys::VIDEO_FILENAME,
        }
    }

    /// Content type of the prepared upload
    pub fn upload_content_type(&self) -> &'static str {
        match self {
            MediaKind::Photo => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }
}

/// Where a pending capture came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Camera,
    Gallery,
    Search,
}

/// A captured or picked item waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMedia {
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub source: MediaSource,
}

impl PendingMedia {
    pub fn new(uri: impl Into<String>, kind: MediaKind, source: MediaSource) -> Self {
        Self {
            uri: uri.into(),
            kind,
            source,
        }
    }
}

/// Direction of an upload relative to the explorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadDirection {
    /// Companion to explorer
    To,
    /// Explorer to companion
    #[default]
    From,
}

impl UploadDirection {
    /// Parse a query value; anything other than `to` falls back to `from`
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            Some("to") => UploadDirection::To,
            _ => UploadDirection::From,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadDirection::To => "to",
            UploadDirection::From => "from",
        }
    }
}

impl fmt::Display for UploadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of an event bundle's `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub event_id: String,
    /// `text` for TTS narration, `audio` for a recorded clip, `video` for a
    /// video bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_dive: Option<String>,
}

/// An event bundle with freshly presigned GET URLs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl Event {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEventsResponse {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPhotosResponse {
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchUploadUrlsResponse {
    pub event_id: String,
    pub urls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsplashSearchResponse {
    #[serde(default)]
    pub results: Vec<UnsplashPhoto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsplashPhoto {
    pub id: String,
    pub urls: UnsplashUrls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsplashUrls {
    pub small: String,
    pub regular: String,
}

/// Reflection document (`reflections` collection)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub id: String,
    pub event_id: Option<String>,
    pub explorer_id: Option<String>,
    pub status: Option<String>,
    pub has_audio_url: bool,
    pub has_deep_dive_audio_url: bool,
}

impl Reflection {
    pub fn from_fields(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            event_id: string_field(fields, FIELD_EVENT_ID),
            explorer_id: string_field(fields, FIELD_EXPLORER_ID),
            status: string_field(fields, FIELD_STATUS),
            has_audio_url: fields.contains_key(FIELD_AUDIO_URL),
            has_deep_dive_audio_url: fields.contains_key(FIELD_DEEP_DIVE_AUDIO_URL),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status.as_deref() == Some(STATUS_DELETED)
    }

    /// Deprecated fields still present on the document
    pub fn deprecated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.has_audio_url {
            fields.push(FIELD_AUDIO_URL);
        }
        if self.has_deep_dive_audio_url {
            fields.push(FIELD_DEEP_DIVE_AUDIO_URL);
        }
        fields
    }
}

/// Explorer response document (`responses` collection).
///
/// The document id is the id of the reflection being answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub id: String,
    pub explorer_id: Option<String>,
    pub response_event_id: Option<String>,
}

impl Response {
    pub fn from_fields(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            explorer_id: string_field(fields, FIELD_EXPLORER_ID),
            response_event_id: string_field(fields, FIELD_RESPONSE_EVENT_ID),
        }
    }

    /// Event id of the selfie bundle, falling back to the document id
    pub fn selfie_event_id(&self) -> &str {
        self.response_event_id.as_deref().unwrap_or(&self.id)
    }
}

/// Companion to explorer link (`relationships` collection)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub explorer_id: String,
    pub user_id: String,
    pub role: String,
    pub companion_name: Option<String>,
}

impl Relationship {
    pub fn from_fields(id: impl Into<String>, fields: &Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            explorer_id: string_field(fields, FIELD_EXPLORER_ID).unwrap_or_default(),
            user_id: string_field(fields, "userId").unwrap_or_default(),
            role: string_field(fields, "role").unwrap_or_default(),
            companion_name: string_field(fields, "companionName"),
        }
    }
}

/// Non-empty string field
fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_pending_media_wire_format() {
        let media = PendingMedia::new("file:///tmp/a.jpg", MediaKind::Photo, MediaSource::Search);
        let value = serde_json::to_value(&media).unwrap();
        assert_eq!(
            value,
            json!({"uri": "file:///tmp/a.jpg", "type": "photo", "source": "search"})
        );
    }

    #[test]
    fn test_upload_direction_lenient() {
        assert_eq!(UploadDirection::parse_lenient(Some("to")), UploadDirection::To);
        assert_eq!(UploadDirection::parse_lenient(Some("from")), UploadDirection::From);
        assert_eq!(UploadDirection::parse_lenient(Some("sideways")), UploadDirection::From);
        assert_eq!(UploadDirection::parse_lenient(None), UploadDirection::From);
    }

    #[test]
    fn test_event_serializes_empty_urls() {
        let event = Event::new("evt-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["image_url"], "");
        assert_eq!(value["metadata_url"], "");
        assert!(value.get("audio_url").is_none());
    }

    #[test]
    fn test_reflection_from_fields() {
        let reflection = Reflection::from_fields(
            "r1",
            &fields(json!({
                "explorerId": "cole",
                "status": "deleted",
                "audio_url": "https://old",
                "event_id": ""
            })),
        );
        assert!(reflection.is_deleted());
        assert_eq!(reflection.explorer_id.as_deref(), Some("cole"));
        assert_eq!(reflection.event_id, None);
        assert_eq!(reflection.deprecated_fields(), vec![FIELD_AUDIO_URL]);
    }

    #[test]
    fn test_response_selfie_event_id_fallback() {
        let with_event = Response::from_fields("r1", &fields(json!({"response_event_id": "e9"})));
        assert_eq!(with_event.selfie_event_id(), "e9");

        let without = Response::from_fields("r2", &fields(json!({"explorerId": "peter"})));
        assert_eq!(without.selfie_event_id(), "r2");
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let metadata: EventMetadata =
            serde_json::from_value(json!({"description": "A dog", "short_caption": "Hi!"}))
                .unwrap();
        assert_eq!(metadata.description, "A dog");
        assert_eq!(metadata.short_caption.as_deref(), Some("Hi!"));
        assert!(metadata.sender.is_empty());
    }
}
