use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME types accepted for upload unless overridden by `ALLOWED_MIME_TYPES`.
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "video/mp4",
    "video/webm",
];

/// Classification of an uploaded asset derived from its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Derive a media type from a MIME type string. Anything that is not an
    /// image or a video is rejected.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let primary = mime_type.split('/').next().unwrap_or("");
        match primary.trim().to_ascii_lowercase().as_str() {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

/// A file record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    // System fields
    pub id: String,
    pub owner: String,
    pub position: u32,
    pub original_name: String,
    /// Object store key; also the last segment of the public `/uploads/` URL.
    pub stored_name: String,
    pub mime_type: String,
    pub media_type: MediaType,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Owner-mutable and counters
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub share_link: Option<String>,
}

/// Input for a new file record. Position and id are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner: String,
    pub original_name: String,
    pub stored_name: String,
    pub mime_type: String,
    pub media_type: MediaType,
    pub byte_size: u64,
    pub tags: BTreeSet<String>,
}

/// Trim tags, drop blank ones and collapse duplicates.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse the comma-separated tag list sent with an upload.
pub fn parse_tag_list(raw: &str) -> BTreeSet<String> {
    normalize_tags(raw.split(','))
}
