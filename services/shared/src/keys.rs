//! Object key layout for the media bucket.

use crate::models::UploadDirection;
use thiserror::Error;

pub const IMAGE_FILENAME: &str = "image.jpg";
pub const METADATA_FILENAME: &str = "metadata.json";
pub const AUDIO_FILENAME: &str = "audio.m4a";
pub const VIDEO_FILENAME: &str = "video.mp4";

/// Marker inserted before the extension of a backup sibling
pub const BACKUP_SUFFIX: &str = "_original";

pub const VOICE_SAMPLE_PREFIX: &str = "assets/voice-samples/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Empty key component: {0}")]
    Empty(&'static str),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Validate a bundle filename: a single segment, dots allowed, no traversal
pub fn sanitize_filename(filename: &str) -> Result<String, KeyError> {
    if filename.is_empty() {
        return Err(KeyError::Empty("filename"));
    }
    if filename.contains('/') || filename.contains("..") || filename.starts_with('.') {
        return Err(KeyError::InvalidFilename(filename.to_string()));
    }

    Ok(filename
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect())
}

/// `{explorer}/{direction}/`
pub fn direction_prefix(explorer_id: &str, direction: UploadDirection) -> String {
    format!("{}/{}/", sanitize_path_component(explorer_id), direction)
}

/// `{explorer}/{direction}/{event_id}/`
pub fn event_folder_prefix(
    explorer_id: &str,
    direction: UploadDirection,
    event_id: &str,
) -> Result<String, KeyError> {
    if event_id.is_empty() {
        return Err(KeyError::Empty("event_id"));
    }
    Ok(format!(
        "{}{}/",
        direction_prefix(explorer_id, direction),
        sanitize_path_component(event_id)
    ))
}

/// `{explorer}/{direction}/{event_id}/{filename}`
pub fn event_object_key(
    explorer_id: &str,
    direction: UploadDirection,
    event_id: &str,
    filename: &str,
) -> Result<String, KeyError> {
    let folder = event_folder_prefix(explorer_id, direction, event_id)?;
    Ok(format!("{}{}", folder, sanitize_filename(filename)?))
}

/// Legacy single-photo key: `{explorer}/{direction}/{unix_seconds}.jpg`
pub fn legacy_photo_key(explorer_id: &str, direction: UploadDirection, unix_seconds: i64) -> String {
    format!("{}{}.jpg", direction_prefix(explorer_id, direction), unix_seconds)
}

pub fn voice_sample_key(voice: &str) -> String {
    format!("{}{}.mp3", VOICE_SAMPLE_PREFIX, voice)
}

/// Split `{prefix}{event_id}/{filename}` into its parts.
///
/// Returns `None` unless the remainder has exactly two non-empty segments.
pub fn parse_event_key<'a>(prefix: &str, key: &'a str) -> Option<(&'a str, &'a str)> {
    let relative = key.strip_prefix(prefix)?;
    let mut parts = relative.split('/');
    let event_id = parts.next()?;
    let filename = parts.next()?;
    if parts.next().is_some() || event_id.is_empty() || filename.is_empty() {
        return None;
    }
    Some((event_id, filename))
}

/// Backup sibling key: `a/b/image.jpg` -> `a/b/image_original.jpg`
pub fn backup_key(key: &str) -> String {
    let (dir, name) = match key.rfind('/') {
        Some(idx) => key.split_at(idx + 1),
        None => ("", key),
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}{}{}", dir, &name[..dot], BACKUP_SUFFIX, &name[dot..]),
        _ => format!("{}{}{}", dir, name, BACKUP_SUFFIX),
    }
}

pub fn is_backup_key(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    stem.ends_with(BACKUP_SUFFIX)
}

/// Replace the first path segment when it equals `from`
pub fn replace_leading_segment(key: &str, from: &str, to: &str) -> Option<String> {
    let rest = key.strip_prefix(from)?;
    if !rest.starts_with('/') {
        return None;
    }
    Some(format!("{}{}", to, rest))
}

/// Content type for an object key based on its extension
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "json" => "application/json",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
