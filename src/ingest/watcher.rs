//! Drop-box ingestion worker.
//!
//! Polls the watch directory and turns each finished media drop into a
//! document with its default tasks:
//!
//! ```text
//! Idle → Scanning → StabilityCheck → Moving → Registering → Idle
//! ```
//!
//! The file is moved into `processed/` before registration starts. The
//! move is what prevents reprocessing: if registration then fails the file
//! stays in `processed/` for an operator to deal with.

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::scanner::{scan_once, AllowList, ScanError};
use super::sniff::sniff_file;
use super::stability::{is_stable, DEFAULT_STABILITY_WINDOW};
use crate::adapters::{DocumentStore, MediaStorage, MediaStorageError, StoreError, UserStore};
use crate::config::{paths, ServiceConfig, WatchConfig};
use crate::domain::{Document, NewDocument};

/// Default idle sleep between cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors that abort a registration after the file was moved
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("No user named '{0}'")]
    UserNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media storage error: {0}")]
    MediaStorage(#[from] MediaStorageError),

    #[error("Failed to read file header: {0}")]
    Sniff(#[source] io::Error),
}

/// Errors that can occur in an ingestion cycle
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Stability check failed for {path}: {source}")]
    Stability {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move {path} to processed: {source}")]
    Move {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Registration of {processed} failed: {source}")]
    Registration {
        processed: PathBuf,
        #[source]
        source: RegistrationError,
    },

    #[error("Another ingestion worker holds {0}")]
    Locked(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where the worker is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Scanning,
    StabilityCheck,
    Moving,
    Registering,
}

/// Result of one completed cycle
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Nothing eligible in the watch directory
    NoCandidate,

    /// Candidate is still being written; left in place
    Unstable(PathBuf),

    /// Candidate disappeared during the stability check
    Vanished(PathBuf),

    /// Document created from the file
    Ingested {
        source: PathBuf,
        processed: PathBuf,
        document: Document,
    },
}

/// Polling and timing settings for the worker
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub watch_dir: PathBuf,
    pub allow_list: AllowList,
    pub poll_interval: Duration,
    pub stability_window: Duration,
}

impl IngestSettings {
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            allow_list: AllowList::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stability_window: DEFAULT_STABILITY_WINDOW,
        }
    }
}

impl From<&ServiceConfig> for IngestSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            watch_dir: config.income.clone(),
            allow_list: config.allow_list.clone(),
            poll_interval: config.poll_interval,
            stability_window: config.stability_window,
        }
    }
}

/// Drop-box ingestion worker
pub struct IngestWorker {
    settings: IngestSettings,
    config: WatchConfig,
    users: Arc<dyn UserStore>,
    documents: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaStorage>,
    state: watch::Sender<IngestState>,
}

impl IngestWorker {
    pub fn new(
        settings: IngestSettings,
        config: WatchConfig,
        users: Arc<dyn UserStore>,
        documents: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaStorage>,
    ) -> Self {
        let (state, _) = watch::channel(IngestState::Idle);

        Self {
            settings,
            config,
            users,
            documents,
            media,
            state,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<IngestState> {
        self.state.subscribe()
    }

    fn enter(&self, state: IngestState) {
        tracing::trace!("Ingest state: {:?}", state);
        self.state.send_replace(state);
    }

    /// Run one scan → check → move → register pass.
    ///
    /// At most one file is ingested per call.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, IngestError> {
        let outcome = self.cycle().await;
        self.enter(IngestState::Idle);
        outcome
    }

    async fn cycle(&self) -> Result<CycleOutcome, IngestError> {
        self.enter(IngestState::Scanning);
        let candidate = scan_once(&self.settings.watch_dir, &self.settings.allow_list).await?;
        let Some(candidate) = candidate else {
            return Ok(CycleOutcome::NoCandidate);
        };

        self.enter(IngestState::StabilityCheck);
        match is_stable(&candidate, self.settings.stability_window).await {
            Ok(true) => {}
            Ok(false) => return Ok(CycleOutcome::Unstable(candidate)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(CycleOutcome::Vanished(candidate));
            }
            Err(source) => {
                return Err(IngestError::Stability {
                    path: candidate,
                    source,
                })
            }
        }

        self.enter(IngestState::Moving);
        let processed = move_to_processed(&candidate)
            .await
            .map_err(|source| IngestError::Move {
                path: candidate.clone(),
                source,
            })?;

        self.enter(IngestState::Registering);
        match self.register(&document_name(&candidate), &processed).await {
            Ok(document) => Ok(CycleOutcome::Ingested {
                source: candidate,
                processed,
                document,
            }),
            Err(source) => Err(IngestError::Registration { processed, source }),
        }
    }

    /// Create the document, media record and tasks for a moved file
    async fn register(
        &self,
        name: &str,
        processed: &Path,
    ) -> Result<Document, RegistrationError> {
        let user = self
            .users
            .find_user_by_username(&self.config.user)
            .await?
            .ok_or_else(|| RegistrationError::UserNotFound(self.config.user.clone()))?;

        let stored = self.media.store_file(processed).await?;
        let content_type = sniff_file(processed).await.map_err(RegistrationError::Sniff)?;

        let new = NewDocument::ingested(
            name,
            user.id,
            stored,
            content_type,
            self.config.task_settings(),
        );

        Ok(self.documents.create_document_with_tasks(new).await?)
    }

    /// Run one cycle while holding the drop-box lock.
    ///
    /// Fails with [`IngestError::Locked`] while another worker owns the drop box.
    pub async fn run_locked_cycle(&self) -> Result<CycleOutcome, IngestError> {
        let _lock = acquire_lock(&self.settings.watch_dir).await?;
        self.run_cycle().await
    }

    /// Take the drop-box lock and run the polling loop in the background
    pub async fn start(self) -> Result<IngestHandle, IngestError> {
        let lock = acquire_lock(&self.settings.watch_dir).await?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let state = self.subscribe();

        let task = tokio::spawn(async move {
            self.run(stop_rx).await;
            // Lock is held until the loop ends
            drop(lock);
        });

        Ok(IngestHandle {
            stop_tx,
            state,
            task,
        })
    }

    async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        tracing::info!(
            "Watching {} for media files",
            self.settings.watch_dir.display()
        );

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("Ingestion worker stopping...");
                    break;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            log_outcome(self.run_cycle().await);
        }
    }
}

/// Log a cycle result at the level it deserves
pub fn log_outcome(outcome: Result<CycleOutcome, IngestError>) {
    match outcome {
        Ok(CycleOutcome::NoCandidate) => {}
        Ok(CycleOutcome::Unstable(path)) => {
            tracing::debug!("Still being written: {}", path.display());
        }
        Ok(CycleOutcome::Vanished(path)) => {
            tracing::debug!("Disappeared during stability check: {}", path.display());
        }
        Ok(CycleOutcome::Ingested {
            source, document, ..
        }) => {
            tracing::info!(
                "Ingested {} as document {} ({})",
                source.display(),
                document.id,
                document.name
            );
        }
        Err(IngestError::Registration { processed, source }) => {
            tracing::error!(
                "Failed to register {}: {}. File left in place for an operator",
                processed.display(),
                source
            );
        }
        Err(e) => {
            tracing::warn!("Ingestion cycle failed: {}", e);
        }
    }
}

/// Handle to control the running worker
pub struct IngestHandle {
    stop_tx: mpsc::Sender<()>,
    state: watch::Receiver<IngestState>,
    task: tokio::task::JoinHandle<()>,
}

impl IngestHandle {
    /// Current state of the worker
    pub fn state(&self) -> IngestState {
        *self.state.borrow()
    }

    /// Stop the worker after its current cycle and wait for it
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Move a file into the `processed` directory next to it.
///
/// A file already in `processed/` under the same name is kept; the new one
/// gets a numbered name instead (`talk-1.mp3`, `talk-2.mp3`, ...).
pub async fn move_to_processed(path: &Path) -> io::Result<PathBuf> {
    let dir = paths::processed_dir_for(path);
    paths::ensure_shared_dir(&dir).await?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let destination = free_destination(&dir, file_name).await?;

    if destination.file_name() != Some(file_name) {
        tracing::warn!(
            "{} already exists, moving {} to {} instead",
            dir.join(file_name).display(),
            path.display(),
            destination.display()
        );
    }

    tokio::fs::rename(path, &destination).await?;
    Ok(destination)
}

/// First path in `dir` for `file_name` that does not exist yet
async fn free_destination(dir: &Path, file_name: &OsStr) -> io::Result<PathBuf> {
    let destination = dir.join(file_name);
    if !tokio::fs::try_exists(&destination).await? {
        return Ok(destination);
    }

    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name).to_string_lossy();
    let extension = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n: u32 = 0;
    loop {
        n += 1;
        let candidate = dir.join(format!("{}-{}{}", stem, n, extension));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
}

/// Document name for an ingested file: its name without extension
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Take the exclusive worker lock inside the watch directory
async fn acquire_lock(watch_dir: &Path) -> Result<File, IngestError> {
    paths::ensure_shared_dir(watch_dir).await?;
    let lock_path = paths::lock_file(watch_dir);

    tokio::task::spawn_blocking(move || -> Result<File, IngestError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        file.try_lock_exclusive()
            .map_err(|_| IngestError::Locked(lock_path))?;

        Ok(file)
    })
    .await
    .map_err(|e| IngestError::Io(io::Error::other(e)))?
}
