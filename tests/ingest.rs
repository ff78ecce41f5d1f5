//! Ingestion Integration Tests
//!
//! Drives the ingestion worker cycle against a real drop-box directory,
//! the SQLite store and filesystem media storage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use mediadrop::adapters::{DocumentStore, FsMediaStorage, SqliteStore, StoreError, UserStore};
use mediadrop::domain::{Document, NewDocument, TaskType, User};
use mediadrop::ingest::{
    CycleOutcome, IngestError, IngestSettings, IngestState, IngestWorker, RegistrationError,
};
use mediadrop::WatchConfig;

struct Fixture {
    _temp: TempDir,
    income: PathBuf,
    media_root: PathBuf,
    store: SqliteStore,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let income = temp.path().join("income");
        let media_root = temp.path().join("media");
        let store = SqliteStore::open_in_memory().unwrap();

        Self {
            _temp: temp,
            income,
            media_root,
            store,
        }
    }

    fn settings(&self) -> IngestSettings {
        IngestSettings {
            poll_interval: Duration::from_millis(10),
            stability_window: Duration::from_millis(10),
            ..IngestSettings::new(&self.income)
        }
    }

    fn worker(&self, config: WatchConfig) -> IngestWorker {
        let store = Arc::new(self.store.clone());
        IngestWorker::new(
            self.settings(),
            config,
            store.clone(),
            store,
            Arc::new(FsMediaStorage::new(&self.media_root)),
        )
    }

    async fn drop_file(&self, name: &str, content: &[u8]) -> PathBuf {
        tokio::fs::create_dir_all(&self.income).await.unwrap();
        let path = self.income.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    fn processed(&self, name: &str) -> PathBuf {
        self.income.join("processed").join(name)
    }
}

fn watch_config(user: &str) -> WatchConfig {
    WatchConfig {
        model: "small".to_string(),
        language: "en".to_string(),
        user: user.to_string(),
        number_of_speakers: Some(2),
    }
}

/// MP4 header followed by padding up to `size` bytes
fn mp4_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x20];
    data.extend_from_slice(b"ftypisom");
    data.resize(size, 0);
    data
}

#[tokio::test]
async fn test_lecture_scenario() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();

    let lecture = fx.drop_file("lecture.mp4", &mp4_bytes(2 * 1024 * 1024)).await;
    let notes = fx.drop_file("notes.txt", b"not media").await;

    let worker = fx.worker(watch_config("ingest"));
    let outcome = worker.run_cycle().await.unwrap();

    let document = match outcome {
        CycleOutcome::Ingested {
            source,
            processed,
            document,
        } => {
            assert_eq!(source, lecture);
            assert_eq!(processed, fx.processed("lecture.mp4"));
            document
        }
        other => panic!("expected ingestion, got {:?}", other),
    };

    assert!(fx.processed("lecture.mp4").exists());
    assert!(!lecture.exists());
    assert_eq!(tokio::fs::read(&notes).await.unwrap(), b"not media");
    assert_eq!(document.name, "lecture");

    let documents = fx.store.list_documents().await.unwrap();
    assert_eq!(documents.len(), 1);

    let media = fx.store.media_files(document.id).await.unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].tags, vec!["original".to_string()]);
    assert_eq!(media[0].content_type, "video/mp4");
    assert!(fx.media_root.join(&media[0].file).exists());

    let tasks = fx.store.tasks_for_document(document.id).await.unwrap();
    let types: Vec<TaskType> = tasks.iter().map(|t| t.task_type).collect();
    assert_eq!(
        types,
        vec![
            TaskType::Reencode,
            TaskType::Transcribe,
            TaskType::Align,
            TaskType::IdentifySpeakers
        ]
    );
    assert_eq!(tasks[1].parameters["model"], "small");
    assert_eq!(tasks[1].parameters["lang"], "en");

    // The processed file is never picked up again
    assert!(matches!(
        worker.run_cycle().await.unwrap(),
        CycleOutcome::NoCandidate
    ));
    assert_eq!(fx.store.list_documents().await.unwrap().len(), 1);
    assert_eq!(worker.subscribe().borrow().clone(), IngestState::Idle);
}

#[tokio::test]
async fn test_unknown_user_moves_file_but_creates_nothing() {
    let fx = Fixture::new();
    let path = fx.drop_file("talk.mp3", b"ID3\x04\x00audio").await;

    let worker = fx.worker(watch_config("nobody"));
    let err = worker.run_cycle().await.unwrap_err();

    match err {
        IngestError::Registration {
            processed,
            source: RegistrationError::UserNotFound(name),
        } => {
            assert_eq!(processed, fx.processed("talk.mp3"));
            assert_eq!(name, "nobody");
        }
        other => panic!("expected user lookup failure, got {:?}", other),
    }

    assert!(!path.exists());
    assert!(fx.processed("talk.mp3").exists());
    assert!(fx.store.list_documents().await.unwrap().is_empty());

    // Not retried
    assert!(matches!(
        worker.run_cycle().await.unwrap(),
        CycleOutcome::NoCandidate
    ));
}

#[tokio::test]
async fn test_empty_configuration_fails_at_user_lookup() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();
    fx.drop_file("memo.wav", b"RIFF\x24\x00\x00\x00WAVEfmt ").await;

    let worker = fx.worker(WatchConfig::default());
    let err = worker.run_cycle().await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Registration {
            source: RegistrationError::UserNotFound(_),
            ..
        }
    ));
    assert!(fx.processed("memo.wav").exists());
}

#[tokio::test]
async fn test_one_file_per_cycle() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        fx.drop_file(name, &mp4_bytes(128)).await;
    }

    let worker = fx.worker(watch_config("ingest"));

    for expected in 1..=3 {
        assert!(matches!(
            worker.run_cycle().await.unwrap(),
            CycleOutcome::Ingested { .. }
        ));
        assert_eq!(fx.store.list_documents().await.unwrap().len(), expected);
    }

    assert!(matches!(
        worker.run_cycle().await.unwrap(),
        CycleOutcome::NoCandidate
    ));
}

#[tokio::test]
async fn test_content_type_comes_from_file_header() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();
    fx.drop_file("voice.mp3", b"OggS\x00\x02\x00\x00\x00\x00").await;

    let worker = fx.worker(watch_config("ingest"));
    let document = match worker.run_cycle().await.unwrap() {
        CycleOutcome::Ingested { document, .. } => document,
        other => panic!("expected ingestion, got {:?}", other),
    };

    let media = fx.store.media_files(document.id).await.unwrap();
    assert_eq!(media[0].content_type, "audio/ogg");
}

#[tokio::test]
async fn test_missing_watch_directory_is_created() {
    let fx = Fixture::new();
    let worker = fx.worker(watch_config("ingest"));

    assert!(matches!(
        worker.run_cycle().await.unwrap(),
        CycleOutcome::NoCandidate
    ));
    assert!(fx.income.is_dir());
}

#[tokio::test]
async fn test_growing_file_is_left_in_place() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();
    let path = fx.drop_file("upload.mp4", &mp4_bytes(64)).await;

    let settings = IngestSettings {
        stability_window: Duration::from_millis(400),
        ..fx.settings()
    };
    let store = Arc::new(fx.store.clone());
    let worker = IngestWorker::new(
        settings,
        watch_config("ingest"),
        store.clone(),
        store,
        Arc::new(FsMediaStorage::new(&fx.media_root)),
    );

    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::write(&writer_path, mp4_bytes(4096)).await.unwrap();
    });

    let outcome = worker.run_cycle().await.unwrap();
    writer.await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Unstable(ref p) if p == &path));
    assert!(path.exists());
    assert!(fx.store.list_documents().await.unwrap().is_empty());

    // Once the writer is done the file goes through
    assert!(matches!(
        worker.run_cycle().await.unwrap(),
        CycleOutcome::Ingested { .. }
    ));
}

/// Store that records every document creation request
#[derive(Default)]
struct RecordingStore {
    created: Mutex<Vec<NewDocument>>,
    fail: bool,
}

#[async_trait]
impl UserStore for RecordingStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(Some(User {
            id: uuid::Uuid::new_v4(),
            username: username.to_string(),
        }))
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn create_document_with_tasks(&self, new: NewDocument) -> Result<Document, StoreError> {
        if self.fail {
            return Err(StoreError::NotFound("database went away".to_string()));
        }

        let document = Document {
            id: uuid::Uuid::new_v4(),
            name: new.name.clone(),
            user_id: new.user_id,
            created_at: new.created_at,
            changed_at: new.created_at,
        };
        self.created.lock().unwrap().push(new);
        Ok(document)
    }
}

fn recording_worker(income: &Path, media: &Path, store: Arc<RecordingStore>) -> IngestWorker {
    IngestWorker::new(
        IngestSettings {
            stability_window: Duration::from_millis(10),
            ..IngestSettings::new(income)
        },
        watch_config("ingest"),
        store.clone(),
        store,
        Arc::new(FsMediaStorage::new(media)),
    )
}

#[tokio::test]
async fn test_document_store_called_once_with_settings() {
    let fx = Fixture::new();
    fx.drop_file("episode.mp4", &mp4_bytes(256)).await;

    let store = Arc::new(RecordingStore::default());
    let worker = recording_worker(&fx.income, &fx.media_root, store.clone());

    worker.run_cycle().await.unwrap();

    let created = store.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "episode");
    assert_eq!(created[0].tasks.model, "small");
    assert_eq!(created[0].tasks.number_of_speakers, Some(2));
    assert_eq!(created[0].media.tags, vec!["original".to_string()]);
    assert_eq!(created[0].media.file.size, 256);
}

#[tokio::test]
async fn test_store_failure_leaves_file_processed() {
    let fx = Fixture::new();
    fx.drop_file("episode.mp4", &mp4_bytes(256)).await;

    let store = Arc::new(RecordingStore {
        fail: true,
        ..Default::default()
    });
    let worker = recording_worker(&fx.income, &fx.media_root, store);

    let err = worker.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Registration {
            source: RegistrationError::Store(_),
            ..
        }
    ));
    assert!(fx.processed("episode.mp4").exists());
}

#[tokio::test]
async fn test_background_worker_ingests_and_stops() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();

    let handle = fx.worker(watch_config("ingest")).start().await.unwrap();
    fx.drop_file("late.mp4", &mp4_bytes(512)).await;

    let mut waited = Duration::ZERO;
    while fx.store.list_documents().await.unwrap().is_empty() {
        assert!(waited < Duration::from_secs(10), "worker never ingested the file");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    handle.stop().await.unwrap();
    assert!(fx.processed("late.mp4").exists());

    // A second worker on the same drop box can start once the first stopped
    let second = fx.worker(watch_config("ingest")).start().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_worker_is_refused() {
    let fx = Fixture::new();

    let first = fx.worker(watch_config("ingest")).start().await.unwrap();
    let second = fx.worker(watch_config("ingest")).start().await;

    assert!(matches!(second, Err(IngestError::Locked(_))));
    first.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_registration_is_not_overwritten_by_same_name() {
    let fx = Fixture::new();
    let worker = fx.worker(watch_config("nobody"));

    fx.drop_file("talk.mp3", b"ID3 first drop").await;
    assert!(worker.run_cycle().await.is_err());

    fx.drop_file("talk.mp3", b"ID3 second drop").await;
    let err = worker.run_cycle().await.unwrap_err();

    match err {
        IngestError::Registration { processed, .. } => {
            assert_eq!(processed, fx.processed("talk-1.mp3"));
        }
        other => panic!("expected registration failure, got {:?}", other),
    }

    let first = tokio::fs::read(fx.processed("talk.mp3")).await.unwrap();
    let second = tokio::fs::read(fx.processed("talk-1.mp3")).await.unwrap();
    assert_eq!(first, b"ID3 first drop");
    assert_eq!(second, b"ID3 second drop");
}

#[tokio::test]
async fn test_renamed_processed_file_keeps_document_name() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();
    tokio::fs::create_dir_all(fx.income.join("processed")).await.unwrap();
    tokio::fs::write(fx.processed("lecture.mp4"), b"older").await.unwrap();
    fx.drop_file("lecture.mp4", &mp4_bytes(128)).await;

    let worker = fx.worker(watch_config("ingest"));
    match worker.run_cycle().await.unwrap() {
        CycleOutcome::Ingested {
            processed,
            document,
            ..
        } => {
            assert_eq!(processed, fx.processed("lecture-1.mp4"));
            assert_eq!(document.name, "lecture");
        }
        other => panic!("expected ingestion, got {:?}", other),
    }
    assert_eq!(tokio::fs::read(fx.processed("lecture.mp4")).await.unwrap(), b"older");
}

#[tokio::test]
async fn test_background_worker_survives_registration_errors() {
    let fx = Fixture::new();
    let handle = fx.worker(watch_config("nobody")).start().await.unwrap();

    fx.drop_file("a.mp3", b"ID3 a").await;
    let first = fx.processed("a.mp3");
    let mut waited = Duration::ZERO;
    while !first.exists() {
        assert!(waited < Duration::from_secs(10), "a.mp3 never moved");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    fx.drop_file("b.mp3", b"ID3 b").await;
    let second = fx.processed("b.mp3");
    let mut waited = Duration::ZERO;
    while !second.exists() {
        assert!(waited < Duration::from_secs(10), "worker stopped after a failed cycle");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    handle.stop().await.unwrap();
    assert!(fx.store.list_documents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_locked_cycle_refused_while_worker_runs() {
    let fx = Fixture::new();
    fx.store.create_user("ingest").await.unwrap();

    let handle = fx.worker(watch_config("ingest")).start().await.unwrap();
    let one_shot = fx.worker(watch_config("ingest"));
    assert!(matches!(
        one_shot.run_locked_cycle().await,
        Err(IngestError::Locked(_))
    ));

    handle.stop().await.unwrap();

    fx.drop_file("after.mp4", &mp4_bytes(64)).await;
    assert!(matches!(
        one_shot.run_locked_cycle().await.unwrap(),
        CycleOutcome::Ingested { .. }
    ));
}
