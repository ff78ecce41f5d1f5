//! Drop-box directory scanner.
//!
//! Picks the first file in the watch directory whose guessed content type
//! is on the allow-list. The pick follows directory listing order; no
//! ordering beyond that is promised.

use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;

use crate::config::paths;

/// Content types ingested when nothing else is configured
pub const DEFAULT_ALLOWED_TYPES: [&str; 3] = ["audio/*", "video/*", ".transcribee"];

/// Errors that can occur while scanning
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to create watch directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list watch directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    /// Literal extension marker, e.g. `.transcribee`
    Extension(String),
    /// Glob over the guessed MIME type, e.g. `audio/*`
    Mime(Pattern),
}

/// Ordered set of content-type patterns eligible for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    patterns: Vec<String>,
    rules: Vec<Rule>,
}

impl AllowList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let rules = patterns
            .iter()
            .map(|p| match p.strip_prefix('.') {
                Some(ext) => Rule::Extension(ext.to_ascii_lowercase()),
                None => Rule::Mime(
                    Pattern::new(p).unwrap_or_else(|_| {
                        // Not a valid glob, match it literally
                        Pattern::new(&Pattern::escape(p)).unwrap_or_default()
                    }),
                ),
            })
            .collect();

        Self { patterns, rules }
    }

    /// Patterns in configuration order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check whether a path is eligible for ingestion
    pub fn matches(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let mime = guess_mime(path);

        self.rules.iter().any(|rule| match rule {
            Rule::Extension(ext) => extension.as_deref() == Some(ext.as_str()),
            Rule::Mime(pattern) => mime.as_deref().is_some_and(|m| pattern.matches(m)),
        })
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TYPES)
    }
}

/// Guess a MIME type from the file name alone
pub fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.essence_str().to_string())
}

/// Scan the watch directory once and return the first eligible file.
///
/// Creates the directory (world-writable) when it does not exist yet.
pub async fn scan_once(
    watch_dir: &Path,
    allow_list: &AllowList,
) -> Result<Option<PathBuf>, ScanError> {
    paths::ensure_shared_dir(watch_dir)
        .await
        .map_err(|source| ScanError::CreateDir {
            path: watch_dir.to_path_buf(),
            source,
        })?;

    let read_dir_err = |source| ScanError::ReadDir {
        path: watch_dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(watch_dir).await.map_err(read_dir_err)?;

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let path = entry.path();

        if !allow_list.matches(&path) {
            continue;
        }

        // Skip directories and entries that vanished since listing
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => return Ok(Some(path)),
            _ => continue,
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_allow_list() {
        let allow = AllowList::default();

        assert!(allow.matches(Path::new("lecture.mp4")));
        assert!(allow.matches(Path::new("interview.mp3")));
        assert!(allow.matches(Path::new("memo.WAV")));
        assert!(allow.matches(Path::new("clip.webm")));
        assert!(allow.matches(Path::new("export.transcribee")));

        assert!(!allow.matches(Path::new("notes.txt")));
        assert!(!allow.matches(Path::new("photo.jpg")));
        assert!(!allow.matches(Path::new("README")));
        assert!(!allow.matches(Path::new("archive.unknownext")));
    }

    #[test]
    fn test_custom_patterns() {
        let allow = AllowList::new(["audio/mpeg"]);
        assert!(allow.matches(Path::new("a.mp3")));
        assert!(!allow.matches(Path::new("a.mp4")));
        assert_eq!(allow.patterns(), &["audio/mpeg".to_string()]);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("x.mp4")).as_deref(), Some("video/mp4"));
        assert_eq!(guess_mime(Path::new("x.txt")).as_deref(), Some("text/plain"));
        assert_eq!(guess_mime(Path::new("x.transcribee")), None);
    }

    #[tokio::test]
    async fn test_scan_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let income = temp.path().join("income");

        let found = scan_once(&income, &AllowList::default()).await.unwrap();

        assert!(found.is_none());
        assert!(income.is_dir());
    }

    #[tokio::test]
    async fn test_scan_selects_only_allowed() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("notes.txt"), b"text").await.unwrap();
        tokio::fs::write(temp.path().join("blob.unknownext"), b"??").await.unwrap();

        assert!(scan_once(temp.path(), &AllowList::default()).await.unwrap().is_none());

        tokio::fs::write(temp.path().join("talk.mp3"), b"ID3").await.unwrap();

        let found = scan_once(temp.path(), &AllowList::default()).await.unwrap();
        assert_eq!(found, Some(temp.path().join("talk.mp3")));
    }

    #[tokio::test]
    async fn test_scan_skips_directories() {
        let temp = TempDir::new().unwrap();
        tokio::fs::create_dir(temp.path().join("folder.mp4")).await.unwrap();
        tokio::fs::create_dir(temp.path().join("processed")).await.unwrap();

        assert!(scan_once(temp.path(), &AllowList::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_picks_exactly_one_of_many() {
        let temp = TempDir::new().unwrap();
        for name in ["a.mp4", "b.mp3", "c.ogg"] {
            tokio::fs::write(temp.path().join(name), b"x").await.unwrap();
        }

        let found = scan_once(temp.path(), &AllowList::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.parent(), Some(temp.path()));
        let name = found.file_name().unwrap().to_string_lossy().to_string();
        assert!(["a.mp4", "b.mp3", "c.ogg"].contains(&name.as_str()));
    }
}
