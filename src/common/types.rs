use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

const FILE_PREFIX: &str = "file:";
const STORAGE_HOST: &str = "https://storage.googleapis.com/";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Stable identifier assigned by the backing log at append time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chronological position of a message: `created_at` first, then `id`.
///
/// Field order matters, the derived `Ord` is the feed's total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub created_at: i64,
    pub id: MessageId,
}

/// Reference to a file uploaded to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Name the file had on the uploader's machine.
    pub name: String,
    /// Object path inside the storage bucket.
    pub path: String,
}

impl FileReference {
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    pub fn is_image(&self) -> bool {
        self.extension()
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Public download link; the object path is encoded as a single segment.
    pub fn download_url(&self, bucket: &str) -> Option<Url> {
        let mut url = Url::parse(STORAGE_HOST).ok()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.clear();
            segments.extend(bucket.split('/').filter(|part| !part.is_empty()));
            segments.push(&self.path);
        }
        Some(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageBody {
    Text(String),
    FileReference(FileReference),
}

impl MessageBody {
    /// Parses the log's stored form. `file:<name>:<path>` becomes a file
    /// reference, anything else (including a malformed `file:` line) is text.
    pub fn from_wire(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(FILE_PREFIX) {
            if let Some((name, path)) = rest.split_once(':') {
                if !name.is_empty() && !path.is_empty() {
                    return Self::FileReference(FileReference {
                        name: name.to_string(),
                        path: path.to_string(),
                    });
                }
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::FileReference(file) => format!("{FILE_PREFIX}{}:{}", file.name, file.path),
        }
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::FileReference(file) => format!("[file] {}", file.name),
        }
    }
}

/// Immutable chat message as delivered by the backing log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub sender_display_name: String,
    pub body: MessageBody,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at).single()
    }

    pub fn local_time_label(&self) -> String {
        self.created_at_utc()
            .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string())
    }
}

/// Upper bound for a backward fetch. There is no "null" boundary: the first
/// page uses `Latest`, every later page starts before a concrete key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    Latest,
    Before(MessageKey),
}

/// Backfill position held by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cursor {
    /// Nothing loaded yet.
    #[default]
    Unset,
    /// Oldest message currently held.
    Before(MessageKey),
    /// The log has no older data.
    Exhausted,
}

impl Cursor {
    pub fn boundary(&self) -> Option<Boundary> {
        match self {
            Self::Before(key) => Some(Boundary::Before(key.clone())),
            Self::Unset | Self::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// One backward page, ascending by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Hint only: a later fetch may still come back empty.
    pub has_more: bool,
}
