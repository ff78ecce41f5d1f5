//! Adapter interfaces for the backing store and media storage.
//!
//! The ingestion worker only talks to these traits. The SQLite store and
//! the filesystem media storage are the implementations used by the
//! service; tests can substitute their own.

pub mod media_storage;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Document, NewDocument, StoredFile, User};

pub use media_storage::FsMediaStorage;
pub use sqlite::{SqliteStore, StoreCounts};

/// Errors raised by the backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database connection lock poisoned")]
    Poisoned,

    #[error("Blocking store task failed: {0}")]
    Join(String),
}

/// Errors raised while persisting media bytes
#[derive(Debug, Error)]
pub enum MediaStorageError {
    #[error("Failed to read source {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write media storage: {0}")]
    Write(#[from] std::io::Error),
}

/// Resolves usernames to users
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}

/// Creates documents together with their initial task set
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the document, its media record and tags, and its default
    /// tasks as one atomic unit
    async fn create_document_with_tasks(&self, new: NewDocument) -> Result<Document, StoreError>;
}

/// Persists media bytes and returns a reference to them
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn store_file(&self, path: &Path) -> Result<StoredFile, MediaStorageError>;
}
