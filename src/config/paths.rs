//! Canonical on-disk layout for mediadrop.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `<root>/../income/` | Drop box watched by the ingestion worker |
//! | `<root>/../income/processed/` | Files that have been ingested |
//! | `<home>/mediadrop.db` | SQLite backing store |
//! | `<home>/media/` | Content-addressed media storage |

use std::io;
use std::path::{Path, PathBuf};

/// Name of the subdirectory ingested files are moved into
pub const PROCESSED_DIR: &str = "processed";

/// Advisory lock held by the single ingestion worker
pub const LOCK_FILE: &str = ".mediadrop.lock";

/// Permission bits for the drop-box directories
pub const SHARED_DIR_MODE: u32 = 0o777;

/// Default drop-box directory for a given root: `<root>/../income`
pub fn income_dir(root: &Path) -> PathBuf {
    root.join("..").join("income")
}

/// The `processed` directory next to a file
pub fn processed_dir_for(file: &Path) -> PathBuf {
    file.parent()
        .unwrap_or(Path::new("."))
        .join(PROCESSED_DIR)
}

/// Path of the SQLite database inside the data home
pub fn database_path(home: &Path) -> PathBuf {
    home.join("mediadrop.db")
}

/// Media storage root inside the data home
pub fn media_dir(home: &Path) -> PathBuf {
    home.join("media")
}

/// Worker lock file inside the drop box
pub fn lock_file(income: &Path) -> PathBuf {
    income.join(LOCK_FILE)
}

/// Create a drop-box directory if it is missing.
///
/// Newly created directories are made world-writable so other users and
/// services can drop files into them. Existing directories are untouched.
pub async fn ensure_shared_dir(dir: &Path) -> io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        return Ok(());
    }

    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(SHARED_DIR_MODE)).await?;
    }

    Ok(())
}
