//! SQLite backing store.
//!
//! Holds users, tokens, documents with their media files, and tasks with
//! their attempts. Every call runs on the blocking pool behind a single
//! mutex-guarded connection so async callers never block a runtime thread.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{DocumentStore, StoreError, UserStore};
use crate::domain::{
    default_task_set, Document, MediaFile, NewDocument, Task, TaskState, TaskType, User,
    UserToken, DEFAULT_REMAINING_ATTEMPTS,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL,
    valid_until TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    user_id TEXT NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_media_files (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    file TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_media_tags (
    id TEXT PRIMARY KEY,
    media_file_id TEXT NOT NULL REFERENCES document_media_files(id) ON DELETE CASCADE,
    tag TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    task_type TEXT NOT NULL,
    task_parameters TEXT NOT NULL,
    state TEXT NOT NULL,
    remaining_attempts INTEGER NOT NULL,
    current_attempt_id TEXT,
    created_at TEXT NOT NULL,
    state_changed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_dependencies (
    dependent_task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    dependant_on_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (dependent_task_id, dependant_on_id)
);

CREATE TABLE IF NOT EXISTS task_attempts (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    attempt_number INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    last_keepalive TEXT NOT NULL,
    ended_at TEXT,
    outcome TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
CREATE INDEX IF NOT EXISTS idx_tasks_document ON tasks(document_id);
CREATE INDEX IF NOT EXISTS idx_user_tokens_valid_until ON user_tokens(valid_until);
"#;

/// Row counts used by the metrics refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub users: u64,
    pub documents: u64,
    pub tasks: HashMap<TaskState, u64>,
}

impl StoreCounts {
    pub fn tasks_in(&self, state: TaskState) -> u64 {
        self.tasks.get(&state).copied().unwrap_or(0)
    }
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Create a user
    pub async fn create_user(&self, username: &str) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        let row = user.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                params![row.id.to_string(), row.username, ts(Utc::now())],
            )?;
            Ok(())
        })
        .await?;

        Ok(user)
    }

    /// Issue a token for a user; only the hash of `secret` is stored
    pub async fn issue_token(
        &self,
        user_id: Uuid,
        secret: &str,
        valid_until: DateTime<Utc>,
    ) -> Result<UserToken, StoreError> {
        let token = UserToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hex::encode(Sha256::digest(secret.as_bytes())),
            valid_until,
        };
        let row = token.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_tokens (id, user_id, token_hash, valid_until) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.user_id.to_string(),
                    row.token_hash,
                    ts(row.valid_until)
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(token)
    }

    /// Number of tokens currently stored
    pub async fn token_count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM user_tokens", [], |r| r.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    /// Delete tokens whose validity ended before `now`
    pub async fn remove_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM user_tokens WHERE valid_until < ?1",
                params![ts(now)],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Assign a `new` task to a worker, opening a fresh attempt
    pub async fn start_attempt(
        &self,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let row: Option<(String, i64)> = tx
                .query_row(
                    "SELECT state, remaining_attempts FROM tasks WHERE id = ?1",
                    params![task_id.to_string()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let (state, remaining) =
                row.ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))?;
            if state != TaskState::New.as_str() || remaining <= 0 {
                return Err(StoreError::NotFound(format!("assignable task {}", task_id)));
            }

            let attempt_number: i64 = tx.query_row(
                "SELECT COUNT(*) + 1 FROM task_attempts WHERE task_id = ?1",
                params![task_id.to_string()],
                |r| r.get(0),
            )?;

            let attempt_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO task_attempts (id, task_id, attempt_number, started_at, last_keepalive)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![attempt_id.to_string(), task_id.to_string(), attempt_number, ts(now)],
            )?;
            tx.execute(
                "UPDATE tasks SET state = ?1, remaining_attempts = remaining_attempts - 1,
                 current_attempt_id = ?2, state_changed_at = ?3 WHERE id = ?4",
                params![
                    TaskState::Assigned.as_str(),
                    attempt_id.to_string(),
                    ts(now),
                    task_id.to_string()
                ],
            )?;

            tx.commit()?;
            Ok(attempt_id)
        })
        .await
    }

    /// Record a worker keepalive for an attempt
    pub async fn keepalive(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE task_attempts SET last_keepalive = ?1 WHERE id = ?2 AND ended_at IS NULL",
                params![ts(now), attempt_id.to_string()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("open attempt {}", attempt_id)));
            }
            Ok(())
        })
        .await
    }

    /// Fail attempts whose last keepalive is older than `timeout`.
    ///
    /// The owning task goes back to `new` while it has attempts left,
    /// otherwise it becomes `failed`. Returns the number of attempts ended.
    pub async fn timeout_attempts(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Result<usize, StoreError> {
        let cutoff = now - timeout;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let stalled: Vec<(String, String, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT t.id, a.id, t.remaining_attempts
                     FROM tasks t JOIN task_attempts a ON a.id = t.current_attempt_id
                     WHERE t.state = ?1 AND a.ended_at IS NULL AND a.last_keepalive < ?2",
                )?;
                let rows = stmt.query_map(params![TaskState::Assigned.as_str(), ts(cutoff)], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            for (task_id, attempt_id, remaining) in &stalled {
                let next = if *remaining > 0 {
                    TaskState::New
                } else {
                    TaskState::Failed
                };

                tx.execute(
                    "UPDATE task_attempts SET ended_at = ?1, outcome = 'failed' WHERE id = ?2",
                    params![ts(now), attempt_id],
                )?;
                tx.execute(
                    "UPDATE tasks SET state = ?1, current_attempt_id = NULL, state_changed_at = ?2
                     WHERE id = ?3",
                    params![next.as_str(), ts(now), task_id],
                )?;
            }

            tx.commit()?;
            Ok(stalled.len())
        })
        .await
    }

    /// Row counts for metrics
    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.with_conn(|conn| {
            let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            let documents: i64 =
                conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;

            let mut tasks = HashMap::new();
            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (state, n) = row?;
                let state = TaskState::parse(&state).ok_or_else(|| StoreError::Corrupt {
                    table: "tasks",
                    detail: format!("unknown state {}", state),
                })?;
                tasks.insert(state, n as u64);
            }

            Ok(StoreCounts {
                users: users as u64,
                documents: documents as u64,
                tasks,
            })
        })
        .await
    }

    /// All documents, oldest first
    pub async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, user_id, created_at, changed_at FROM documents ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?;

            let mut documents = Vec::new();
            for row in rows {
                let (id, name, user_id, created_at, changed_at) = row?;
                documents.push(Document {
                    id: parse_uuid("documents", &id)?,
                    name,
                    user_id: parse_uuid("documents", &user_id)?,
                    created_at: parse_ts("documents", &created_at)?,
                    changed_at: parse_ts("documents", &changed_at)?,
                });
            }
            Ok(documents)
        })
        .await
    }

    /// Media files of a document, with their tags
    pub async fn media_files(&self, document_id: Uuid) -> Result<Vec<MediaFile>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, file, content_type, created_at FROM document_media_files
                 WHERE document_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![document_id.to_string()], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?;
            let rows: Vec<_> = rows.collect::<Result<_, _>>()?;

            let mut tag_stmt = conn.prepare(
                "SELECT tag FROM document_media_tags WHERE media_file_id = ?1 ORDER BY tag",
            )?;

            let mut files = Vec::new();
            for (id, file, content_type, created_at) in rows {
                let tags = tag_stmt
                    .query_map(params![id], |r| r.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;

                files.push(MediaFile {
                    id: parse_uuid("document_media_files", &id)?,
                    document_id,
                    file,
                    content_type,
                    tags,
                    created_at: parse_ts("document_media_files", &created_at)?,
                });
            }
            Ok(files)
        })
        .await
    }

    /// Tasks of a document in creation order
    pub async fn tasks_for_document(&self, document_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks WHERE document_id = ?1 ORDER BY created_at, rowid",
            )?;
            let ids = stmt
                .query_map(params![document_id.to_string()], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            ids.iter()
                .map(|id| {
                    load_task(conn, id)?
                        .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))
                })
                .collect()
        })
        .await
    }

    /// Load a single task
    pub async fn task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        self.with_conn(move |conn| load_task(conn, &task_id.to_string())).await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = username.to_string();

        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    params![username],
                    |r| r.get(0),
                )
                .optional()?;

            row.map(|id| {
                Ok(User {
                    id: parse_uuid("users", &id)?,
                    username,
                })
            })
            .transpose()
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document_with_tasks(&self, new: NewDocument) -> Result<Document, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let document = insert_document(&tx, &new)?;
            tx.commit()?;
            Ok(document)
        })
        .await
    }
}

/// Insert document, media file, tags and the default task set
fn insert_document(tx: &Transaction<'_>, new: &NewDocument) -> Result<Document, StoreError> {
    let now = ts(new.created_at);
    let document = Document {
        id: Uuid::new_v4(),
        name: new.name.clone(),
        user_id: new.user_id,
        created_at: new.created_at,
        changed_at: new.created_at,
    };

    tx.execute(
        "INSERT INTO documents (id, name, user_id, created_at, changed_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![document.id.to_string(), document.name, document.user_id.to_string(), now],
    )?;

    let media_id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO document_media_files (id, document_id, file, size, content_type, created_at, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            media_id.to_string(),
            document.id.to_string(),
            new.media.file.key,
            new.media.file.size as i64,
            new.media.content_type,
            now
        ],
    )?;

    for tag in &new.media.tags {
        tx.execute(
            "INSERT INTO document_media_tags (id, media_file_id, tag) VALUES (?1, ?2, ?3)",
            params![Uuid::new_v4().to_string(), media_id.to_string(), tag],
        )?;
    }

    let tasks = default_task_set(&new.tasks);
    let task_ids: Vec<Uuid> = tasks.iter().map(|_| Uuid::new_v4()).collect();

    for (task, id) in tasks.iter().zip(&task_ids) {
        tx.execute(
            "INSERT INTO tasks (id, document_id, task_type, task_parameters, state, remaining_attempts,
             created_at, state_changed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                document.id.to_string(),
                task.task_type.as_str(),
                serde_json::to_string(&task.parameters)?,
                TaskState::New.as_str(),
                DEFAULT_REMAINING_ATTEMPTS as i64,
                now
            ],
        )?;

        for dep in &task.depends_on {
            let dep_id = task_ids.get(*dep).ok_or_else(|| StoreError::Corrupt {
                table: "task_dependencies",
                detail: format!("dependency index {} out of range", dep),
            })?;
            tx.execute(
                "INSERT INTO task_dependencies (dependent_task_id, dependant_on_id) VALUES (?1, ?2)",
                params![id.to_string(), dep_id.to_string()],
            )?;
        }
    }

    Ok(document)
}

fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
    let row = conn
        .query_row(
            "SELECT document_id, task_type, task_parameters, state, remaining_attempts,
             current_attempt_id, created_at FROM tasks WHERE id = ?1",
            params![id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((document_id, task_type, parameters, state, remaining, attempt, created_at)) = row
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT d.dependant_on_id FROM task_dependencies d JOIN tasks t ON t.id = d.dependant_on_id
         WHERE d.dependent_task_id = ?1 ORDER BY t.created_at, t.rowid",
    )?;
    let dependencies = stmt
        .query_map(params![id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(|d| parse_uuid("task_dependencies", d))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Task {
        id: parse_uuid("tasks", id)?,
        document_id: parse_uuid("tasks", &document_id)?,
        task_type: TaskType::parse(&task_type).ok_or_else(|| StoreError::Corrupt {
            table: "tasks",
            detail: format!("unknown task type {}", task_type),
        })?,
        parameters: serde_json::from_str(&parameters)?,
        state: TaskState::parse(&state).ok_or_else(|| StoreError::Corrupt {
            table: "tasks",
            detail: format!("unknown state {}", state),
        })?,
        remaining_attempts: remaining.max(0) as u32,
        current_attempt_id: attempt.as_deref().map(|a| parse_uuid("tasks", a)).transpose()?,
        dependencies,
        created_at: parse_ts("tasks", &created_at)?,
    }))
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(table: &'static str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("bad timestamp {}: {}", s, e),
        })
}

fn parse_uuid(table: &'static str, s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad id {}: {}", s, e),
    })
}
