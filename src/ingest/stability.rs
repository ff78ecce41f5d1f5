//! Write-completion heuristic.
//!
//! A file counts as stable when its size does not change across a short
//! sampling window. A static file may occasionally be reported as still
//! changing; the caller simply retries on its next cycle.

use std::io;
use std::path::Path;
use std::time::Duration;

/// Default sampling window between the two size reads
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_secs(1);

/// Check whether `path` kept the same size across `window`.
///
/// Returns the underlying not-found error if the file disappears between
/// samples.
pub async fn is_stable(path: &Path, window: Duration) -> io::Result<bool> {
    let before = tokio::fs::metadata(path).await?.len();
    tokio::time::sleep(window).await;
    let after = tokio::fs::metadata(path).await?.len();

    Ok(before == after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_unchanged_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("done.mp4");
        tokio::fs::write(&path, vec![0u8; 2048]).await.unwrap();

        assert!(is_stable(&path, Duration::from_millis(20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_growing_file_is_unstable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("uploading.mp4");
        tokio::fs::write(&path, b"partial").await.unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .await
                .unwrap();
            file.write_all(b" more bytes").await.unwrap();
            file.flush().await.unwrap();
        });

        let stable = is_stable(&path, Duration::from_millis(400)).await.unwrap();
        writer.await.unwrap();

        assert!(!stable);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = is_stable(&temp.path().join("gone.mp4"), Duration::from_millis(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
