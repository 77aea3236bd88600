use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::analyzer::ClinicalAnalyzer;
use crate::context::AnalysisContext;
use crate::error::Result;
use crate::result::AnalysisResult;
use crate::tasks::store::{Admission, Task, TaskOutcome, TaskStatus, TaskStore};

/// Cause recorded when the analysis future panics
pub const TASK_ABORTED: &str = "analysis task aborted unexpectedly";

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub coalesced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Processing,
    Done(AnalysisResult),
    Failed {
        error: String,
        analysis: AnalysisResult,
    },
    NotFound,
}

/// Lifetime counters shared by the orchestrator and the supervisor
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    completed_done: AtomicU64,
    completed_failed: AtomicU64,
    supervisor_failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub coalesced: u64,
    pub completed_done: u64,
    pub completed_failed: u64,
    pub supervisor_failed: u64,
    pub processing: usize,
}

impl OrchestratorStats {
    pub fn record_supervisor_failure(&self) {
        self.supervisor_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completion(&self, failed: bool) {
        let counter = if failed {
            &self.completed_failed
        } else {
            &self.completed_done
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, processing: usize) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            completed_done: self.completed_done.load(Ordering::Relaxed),
            completed_failed: self.completed_failed.load(Ordering::Relaxed),
            supervisor_failed: self.supervisor_failed.load(Ordering::Relaxed),
            processing,
        }
    }
}

/// Accepts analyses, runs them in the background, and answers polls
#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    analyzer: Arc<ClinicalAnalyzer>,
    stats: Arc<OrchestratorStats>,
}

impl TaskOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        analyzer: Arc<ClinicalAnalyzer>,
        stats: Arc<OrchestratorStats>,
    ) -> Self {
        Self {
            store,
            analyzer,
            stats,
        }
    }

    /// Register a task and schedule its analysis. Returns as soon as the
    /// task is visible to `poll`; never waits for the model.
    pub async fn submit(&self, context: AnalysisContext, force: bool) -> Result<SubmitReceipt> {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let task = Task::processing(&context, Utc::now());

        let task_id = match self.store.admit(task, !force).await? {
            Admission::Coalesced(id) => {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::info!(task_id = %id, "identical context already processing, coalesced");
                return Ok(SubmitReceipt {
                    task_id: id,
                    coalesced: true,
                });
            }
            Admission::Created(id) => id,
        };
        tracing::info!(task_id = %task_id, mode = %context.mode(), force, "analysis submitted");

        let store = Arc::clone(&self.store);
        let analyzer = Arc::clone(&self.analyzer);
        let stats = Arc::clone(&self.stats);
        let id = task_id.clone();
        tokio::spawn(async move {
            let mode = context.mode();
            let outcome = match AssertUnwindSafe(analyzer.run(&context, force))
                .catch_unwind()
                .await
            {
                Ok(result) => TaskOutcome::from_result(result),
                Err(_) => {
                    tracing::error!(task_id = %id, "analysis task panicked");
                    TaskOutcome::Failed {
                        error: TASK_ABORTED.to_string(),
                        result: AnalysisResult::failed(mode, TASK_ABORTED),
                    }
                }
            };
            let failed = outcome.is_failed();
            match store.complete(&id, outcome, Utc::now()).await {
                Ok(true) => {
                    stats.record_completion(failed);
                    tracing::info!(task_id = %id, failed, "analysis complete");
                }
                Ok(false) => {
                    tracing::debug!(task_id = %id, "task already terminal, late result discarded");
                }
                Err(e) => {
                    tracing::error!(task_id = %id, "failed to store analysis result: {}", e);
                }
            }
        });

        Ok(SubmitReceipt {
            task_id,
            coalesced: false,
        })
    }

    pub async fn poll(&self, task_id: &str) -> Result<PollOutcome> {
        let Some(task) = self.store.get(task_id).await? else {
            return Ok(PollOutcome::NotFound);
        };
        Ok(match task.status {
            TaskStatus::Processing => PollOutcome::Processing,
            TaskStatus::Done => PollOutcome::Done(
                task.result
                    .unwrap_or_else(|| AnalysisResult::waiting(task.mode)),
            ),
            TaskStatus::Failed => {
                let error = task
                    .error
                    .unwrap_or_else(|| "analysis failed".to_string());
                let analysis = task
                    .result
                    .unwrap_or_else(|| AnalysisResult::failed(task.mode, error.clone()));
                PollOutcome::Failed { error, analysis }
            }
        })
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let processing = self.store.count_processing().await?;
        Ok(self.stats.snapshot(processing))
    }
}
