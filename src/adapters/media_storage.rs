//! Content-addressed media storage on the local filesystem.
//!
//! Files are copied to `<root>/<sha256>`; storing the same bytes twice
//! yields the same key and a single copy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::{MediaStorage, MediaStorageError};
use crate::domain::StoredFile;

const CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-backed media storage
#[derive(Debug, Clone)]
pub struct FsMediaStorage {
    root: PathBuf,
}

impl FsMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a stored file
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl MediaStorage for FsMediaStorage {
    async fn store_file(&self, path: &Path) -> Result<StoredFile, MediaStorageError> {
        let read_err = |source| MediaStorageError::Read {
            path: path.to_path_buf(),
            source,
        };

        let hash = compute_file_hash(path).await.map_err(read_err)?;
        let target = self.path_for(&hash);

        tokio::fs::create_dir_all(&self.root).await?;

        if !tokio::fs::try_exists(&target).await? {
            // Copy under a temporary name so a partial copy never owns the key
            let partial = self.root.join(format!(".{}.partial", hash));
            tokio::fs::copy(path, &partial).await.map_err(read_err)?;
            tokio::fs::rename(&partial, &target).await?;
        }

        let size = tokio::fs::metadata(&target).await?.len();

        Ok(StoredFile { key: hash, size })
    }
}

/// Compute the SHA256 of a file's content (hex), streaming in chunks
pub async fn compute_file_hash(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
