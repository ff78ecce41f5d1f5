//! Documents and their media files.
//!
//! A document is created by the ingestion worker together with its
//! original media file and its default task set, all in one store call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskSettings;

/// Tag attached to the media file an ingested document was created from
pub const ORIGINAL_TAG: &str = "original";

/// A persisted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for this document
    pub id: Uuid,

    /// Display name (file stem of the ingested file)
    pub name: String,

    /// Owning user
    pub user_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub changed_at: DateTime<Utc>,
}

/// A media file attached to a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: Uuid,
    pub document_id: Uuid,

    /// Storage key returned by the media storage
    pub file: String,

    /// Content type sniffed from the file contents
    pub content_type: String,

    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Handle to bytes persisted by a media storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Storage key (content hash)
    pub key: String,

    /// Size in bytes
    pub size: u64,
}

/// Media file to attach when creating a document
#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub file: StoredFile,
    pub content_type: String,
    pub tags: Vec<String>,
}

/// Everything the store needs to create a document and its initial tasks
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub user_id: Uuid,
    pub media: NewMediaFile,
    pub tasks: TaskSettings,
    pub created_at: DateTime<Utc>,
}

impl NewDocument {
    /// Document for an ingested file, with its media tagged as the original
    pub fn ingested(
        name: impl Into<String>,
        user_id: Uuid,
        file: StoredFile,
        content_type: impl Into<String>,
        tasks: TaskSettings,
    ) -> Self {
        Self {
            name: name.into(),
            user_id,
            media: NewMediaFile {
                file,
                content_type: content_type.into(),
                tags: vec![ORIGINAL_TAG.to_string()],
            },
            tasks,
            created_at: Utc::now(),
        }
    }
}
