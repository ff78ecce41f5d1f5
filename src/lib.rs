//! mediadrop - Drop-folder media ingestion
//!
//! Watches a drop-box directory for finished media files and registers
//! each one as a document with its default transcription tasks, while a
//! periodic runner performs store maintenance.
//!
//! # Architecture
//!
//! The ingestion worker polls instead of relying on filesystem events:
//! - A file is picked only once its size stops changing
//! - It is moved to `processed/` before it is registered
//! - The move, not a database flag, prevents double ingestion
//!
//! # Modules
//!
//! - `adapters`: Backing store and media storage
//! - `config`: Service and autoprocess configuration
//! - `core`: Periodic runner, maintenance jobs, service bootstrap
//! - `domain`: Data structures (User, Document, Task)
//! - `ingest`: Scanner, stability check, ingestion worker
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create the user that owns ingested documents
//! mediadrop create-user ingest
//!
//! # Run the worker and maintenance jobs
//! mediadrop serve
//!
//! # Ingest at most one file and exit
//! mediadrop scan
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use adapters::{DocumentStore, FsMediaStorage, MediaStorage, SqliteStore, UserStore};
pub use config::{ServiceConfig, WatchConfig};
pub use crate::core::{PeriodicJob, Scheduler, Service};
pub use domain::{Document, NewDocument, Task, TaskState, TaskType, User};
pub use ingest::{AllowList, CycleOutcome, IngestError, IngestSettings, IngestWorker};
