//! Task records and the store that owns their state transitions
//!
//! A task leaves `Processing` exactly once. Both the analysis completion path
//! and the supervisor go through [`TaskStore::complete`]; the first write wins
//! and later writes are no-ops.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::context::{AnalysisContext, AnalysisMode, Fingerprint};
use crate::error::Result;
use crate::result::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub mode: AnalysisMode,
    pub fingerprint: Fingerprint,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
}

impl Task {
    /// Fresh `Processing` task with a random id
    pub fn processing(context: &AnalysisContext, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: TaskStatus::Processing,
            mode: context.mode(),
            fingerprint: context.fingerprint(),
            started_at,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// Terminal transition requested for a task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Done(AnalysisResult),
    Failed {
        error: String,
        result: AnalysisResult,
    },
}

impl TaskOutcome {
    /// Connectivity failures fail the task; every other analyzer outcome completes it
    pub fn from_result(result: AnalysisResult) -> Self {
        if result.is_error() {
            let error = result
                .llm_error
                .clone()
                .unwrap_or_else(|| "model call failed".to_string());
            TaskOutcome::Failed { error, result }
        } else {
            TaskOutcome::Done(result)
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Created(String),
    /// An identical context is already processing under this id
    Coalesced(String),
}

impl Admission {
    pub fn task_id(&self) -> &str {
        match self {
            Admission::Created(id) | Admission::Coalesced(id) => id,
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, Admission::Coalesced(_))
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a `Processing` task, or with `coalesce` return the id of an
    /// in-flight task with the same fingerprint instead
    async fn admit(&self, task: Task, coalesce: bool) -> Result<Admission>;

    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Move a task out of `Processing`. Returns false if it was already terminal or unknown.
    async fn complete(&self, id: &str, outcome: TaskOutcome, at: DateTime<Utc>) -> Result<bool>;

    /// Processing tasks started before `cutoff`
    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Drop terminal tasks finished before `cutoff`; returns how many
    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn count_processing(&self) -> Result<usize>;
}

/// Process-local store; tasks do not survive a restart.
///
/// Lock order is `inflight` then `tasks`; no path holds a `tasks` guard while
/// touching `inflight`.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<String, Task>,
    inflight: DashMap<Fingerprint, String>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn admit(&self, task: Task, coalesce: bool) -> Result<Admission> {
        let id = task.id.clone();
        if !coalesce {
            let fingerprint = task.fingerprint;
            self.tasks.insert(id.clone(), task);
            self.inflight.insert(fingerprint, id.clone());
            return Ok(Admission::Created(id));
        }

        match self.inflight.entry(task.fingerprint) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get().clone();
                let still_running = self
                    .tasks
                    .get(&existing)
                    .is_some_and(|t| t.status == TaskStatus::Processing);
                if still_running {
                    return Ok(Admission::Coalesced(existing));
                }
                self.tasks.insert(id.clone(), task);
                slot.insert(id.clone());
            }
            Entry::Vacant(slot) => {
                self.tasks.insert(id.clone(), task);
                slot.insert(id.clone());
            }
        }
        Ok(Admission::Created(id))
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }

    async fn complete(&self, id: &str, outcome: TaskOutcome, at: DateTime<Utc>) -> Result<bool> {
        let fingerprint = {
            let Some(mut task) = self.tasks.get_mut(id) else {
                return Ok(false);
            };
            if task.status.is_terminal() {
                return Ok(false);
            }
            match outcome {
                TaskOutcome::Done(result) => {
                    task.status = TaskStatus::Done;
                    task.result = Some(result);
                }
                TaskOutcome::Failed { error, result } => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error);
                    task.result = Some(result);
                }
            }
            task.finished_at = Some(at);
            task.fingerprint
        };
        self.inflight.remove_if(&fingerprint, |_, owner| owner == id);
        Ok(true)
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Processing && t.started_at < cutoff)
            .map(|t| t.clone())
            .collect())
    }

    async fn evict_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| {
            !(t.status.is_terminal() && t.finished_at.is_some_and(|at| at < cutoff))
        });
        Ok(before.saturating_sub(self.tasks.len()))
    }

    async fn count_processing(&self) -> Result<usize> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Processing)
            .count())
    }
}
