//! Drop-box ingestion pipeline.
//!
//! This module turns media files dropped into the watch directory into
//! documents. The pipeline:
//!
//! 1. **Scanner**: Picks the first allow-listed file in the drop box
//! 2. **Stability**: Skips files whose size is still changing
//! 3. **Watcher**: Moves the file to `processed/` and registers it
//!
//! # Architecture
//!
//! ```text
//! income/ → Scanner → Stability → move → income/processed/
//!                                          ↓
//!                          MediaStorage + DocumentStore
//! ```

pub mod scanner;
pub mod sniff;
pub mod stability;
pub mod watcher;

// Re-export key types
pub use scanner::{guess_mime, scan_once, AllowList, ScanError, DEFAULT_ALLOWED_TYPES};
pub use sniff::{sniff_content_type, sniff_file};
pub use stability::is_stable;
pub use watcher::{
    CycleOutcome, IngestError, IngestHandle, IngestSettings, IngestState, IngestWorker,
    RegistrationError,
};
