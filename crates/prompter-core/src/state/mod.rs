//! Durable, concurrent-safe record of run state.
//!
//! JSON persisted form written via `serde_json`, guarded by a single
//! `tokio::sync::Mutex` -- the store is shared across async tasks, so a
//! std `Mutex` held across an `.await` would be wrong. Atomic write:
//! serialize to `<path>.json.tmp` in the same directory, `fsync` the
//! temp file, then `std::fs::rename` over the target (rename is atomic
//! on the same filesystem on both POSIX and Windows when the target is
//! replaced).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StateError;

/// Dynamic, per-run status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

/// Dynamic, per-run state of one task.
///
/// Every optional/forward-compatible field uses `serde(default)` so a
/// state file written by a newer version with extra fields still loads:
/// readers must tolerate extra fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u32,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            session_id: None,
            started_at: None,
            ended_at: None,
            execution_count: 0,
        }
    }
}

/// A partial update applied to one task's state by `StateStore::update`.
#[derive(Debug, Clone, Default)]
pub struct TaskStateUpdate {
    pub status: Option<TaskStatus>,
    pub attempts: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub session_id: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub ended_at: Option<Option<DateTime<Utc>>>,
    pub execution_count: Option<u32>,
}

impl TaskStateUpdate {
    fn apply(self, state: &mut TaskState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(attempts) = self.attempts {
            state.attempts = attempts;
        }
        if let Some(last_error) = self.last_error {
            state.last_error = last_error;
        }
        if let Some(session_id) = self.session_id {
            state.session_id = session_id;
        }
        if let Some(started_at) = self.started_at {
            state.started_at = started_at;
        }
        if let Some(ended_at) = self.ended_at {
            state.ended_at = ended_at;
        }
        if let Some(execution_count) = self.execution_count {
            state.execution_count = execution_count;
        }
    }
}

/// The persisted record for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: HashMap<String, TaskState>,
}

impl RunRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            started_at: now,
            last_updated_at: now,
            tasks: HashMap::new(),
        }
    }

    /// A run may be resumed only if the configuration's task names are a
    /// superset of what was recorded; unknown names in the record are
    /// ignored with a warning.
    pub fn warn_on_unknown_tasks(&self, known_task_names: &[String]) {
        let known: std::collections::HashSet<&str> =
            known_task_names.iter().map(String::as_str).collect();
        for name in self.tasks.keys() {
            if !known.contains(name.as_str()) {
                tracing::warn!(
                    task = %name,
                    "state file references a task not present in the current configuration; ignoring"
                );
            }
        }
    }

    /// Derived, read-only summary of this record.
    pub fn summarize(&self) -> RunSummary {
        let mut by_status: HashMap<TaskStatus, u32> = HashMap::new();
        let mut total_attempts = 0u32;
        for state in self.tasks.values() {
            *by_status.entry(state.status).or_insert(0) += 1;
            total_attempts += state.attempts;
        }
        RunSummary {
            session_id: self.session_id.clone(),
            total_tasks: self.tasks.len() as u32,
            completed: *by_status.get(&TaskStatus::Completed).unwrap_or(&0),
            failed: *by_status.get(&TaskStatus::Failed).unwrap_or(&0),
            skipped: *by_status.get(&TaskStatus::Skipped).unwrap_or(&0),
            total_attempts,
            wall_time: self.last_updated_at - self.started_at,
        }
    }
}

/// Post-run summary: counts by terminal status, attempts, total wall time.
///
/// Pure derived data over `RunRecord`; does not change any task's
/// scheduling behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub session_id: String,
    pub total_tasks: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total_attempts: u32,
    pub wall_time: chrono::Duration,
}

/// Durable, lock-protected state store.
///
/// All reads and writes execute under one exclusive in-process lock. The
/// lock may be held across the atomic write; callers MUST release it
/// before any long-running operation (AI query or verification) -- in
/// practice this means every public method here is a short, self-
/// contained critical section, never held open across an `.await` that
/// leaves this module.
pub struct StateStore {
    path: PathBuf,
    record: Mutex<RunRecord>,
}

impl StateStore {
    /// Read `path` if present, else start a fresh record keyed by
    /// `session_id`.
    pub async fn load(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self, StateError> {
        let path = path.into();
        let record = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunRecord::new(session_id),
            Err(source) => {
                return Err(StateError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };
        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutate fields of one task's state under the exclusive lock, then
    /// persist.
    pub async fn update(&self, task_name: &str, changes: TaskStateUpdate) -> Result<(), StateError> {
        let mut record = self.record.lock().await;
        let state = record.tasks.entry(task_name.to_string()).or_default();
        changes.apply(state);
        record.last_updated_at = Utc::now();
        Self::persist(&self.path, &record).await
    }

    /// Convenience mutation used at the end of an attempt: increments
    /// `attempts`, sets terminal/non-terminal `status`, and captures
    /// `last_error`/`session_id`/`ended_at` as applicable.
    pub async fn mark_attempt(
        &self,
        task_name: &str,
        success: bool,
        error: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), StateError> {
        let mut record = self.record.lock().await;
        let state = record.tasks.entry(task_name.to_string()).or_default();
        state.attempts += 1;
        state.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        state.last_error = error;
        if session_id.is_some() {
            state.session_id = session_id;
        }
        state.ended_at = Some(Utc::now());
        record.last_updated_at = Utc::now();
        Self::persist(&self.path, &record).await
    }

    /// Immutable copy of the run record, for reporters.
    pub async fn snapshot(&self) -> RunRecord {
        self.record.lock().await.clone()
    }

    /// The `session_id` of the most recently updated task matching
    /// `predicate`, used by session resumption.
    ///
    /// "Most recently updated" is approximated by `ended_at`, falling back
    /// to `started_at` for a task still RUNNING.
    pub async fn most_recent_session_id(
        &self,
        predicate: impl Fn(&str, &TaskState) -> bool,
    ) -> Option<String> {
        let record = self.record.lock().await;
        record
            .tasks
            .iter()
            .filter(|(name, state)| predicate(name, state))
            .filter_map(|(_, state)| {
                let timestamp = state.ended_at.or(state.started_at)?;
                state.session_id.clone().map(|sid| (timestamp, sid))
            })
            .max_by_key(|(timestamp, _)| *timestamp)
            .map(|(_, sid)| sid)
    }

    pub async fn get(&self, task_name: &str) -> Option<TaskState> {
        self.record.lock().await.tasks.get(task_name).cloned()
    }

    /// Delete the persistent form at `path`. Safe to call even if the file
    /// was already removed.
    pub async fn clear(path: &Path) -> Result<(), StateError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write `<path>.tmp` in the same directory, fsync it, then
    /// atomically rename it over `path`. Never writes the target file in
    /// place, so a crash mid-write leaves either the prior valid file or a
    /// stray temp file -- never a truncated target.
    async fn persist(path: &Path, record: &RunRecord) -> Result<(), StateError> {
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record).expect("RunRecord is always serializable");

        let path = path.to_path_buf();
        let tmp_path_for_task = tmp_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp_path_for_task)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path_for_task, &path)?;
            Ok(())
        })
        .await
        .expect("persist task should not panic")
        .map_err(|source| StateError::Persist {
            path: tmp_path,
            source,
        })
    }
}
