//! Domain types for the mediadrop backend.
//!
//! This module contains the records the ingestion worker and the
//! maintenance jobs read and write through the store:
//! - User: Owner of documents, resolved by username
//! - Document: A unit of transcription work and its media
//! - Task: Processing steps created for a document

pub mod document;
pub mod task;
pub mod user;

// Re-export commonly used types
pub use document::{Document, MediaFile, NewDocument, NewMediaFile, StoredFile, ORIGINAL_TAG};
pub use task::{
    default_task_set, NewTask, Task, TaskSettings, TaskState, TaskType, DEFAULT_REMAINING_ATTEMPTS,
};
pub use user::{User, UserToken};
