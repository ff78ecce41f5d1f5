//! Processing tasks created for a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Maximum attempts a task gets before it is marked failed for good
pub const DEFAULT_REMAINING_ATTEMPTS: u32 = 3;

/// Kind of processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reencode,
    Transcribe,
    Align,
    IdentifySpeakers,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reencode => "reencode",
            Self::Transcribe => "transcribe",
            Self::Align => "align",
            Self::IdentifySpeakers => "identify_speakers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reencode" => Some(Self::Reencode),
            "transcribe" => Some(Self::Transcribe),
            "align" => Some(Self::Align),
            "identify_speakers" => Some(Self::IdentifySpeakers),
            _ => None,
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker
    New,

    /// Claimed by a worker, attempt in progress
    Assigned,

    Completed,
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [Self::New, Self::Assigned, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Assigned => "assigned",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "assigned" => Some(Self::Assigned),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Transcription parameters applied to every ingested document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    pub model: String,
    pub language: String,

    /// `None` lets the speaker identification step decide
    pub number_of_speakers: Option<u32>,
}

/// A persisted task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub document_id: Uuid,
    pub task_type: TaskType,
    pub parameters: serde_json::Value,
    pub state: TaskState,

    /// Attempts left before the task fails permanently
    pub remaining_attempts: u32,

    /// Attempt currently holding the task (only while assigned)
    pub current_attempt_id: Option<Uuid>,

    /// Tasks that must complete before this one can start
    pub dependencies: Vec<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// A task to create, with dependencies given as indices into the same batch
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub parameters: serde_json::Value,
    pub depends_on: Vec<usize>,
}

/// Build the default task chain for a freshly ingested document.
///
/// `reencode → transcribe → align`, followed by `identify_speakers`
/// unless exactly one speaker was configured.
pub fn default_task_set(settings: &TaskSettings) -> Vec<NewTask> {
    let mut tasks = vec![
        NewTask {
            task_type: TaskType::Reencode,
            parameters: json!({}),
            depends_on: vec![],
        },
        NewTask {
            task_type: TaskType::Transcribe,
            parameters: json!({
                "model": settings.model,
                "lang": settings.language,
            }),
            depends_on: vec![0],
        },
        NewTask {
            task_type: TaskType::Align,
            parameters: json!({}),
            depends_on: vec![1],
        },
    ];

    if settings.number_of_speakers != Some(1) {
        tasks.push(NewTask {
            task_type: TaskType::IdentifySpeakers,
            parameters: json!({ "number_of_speakers": settings.number_of_speakers }),
            depends_on: vec![2],
        });
    }

    tasks
}
