use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::result::AnalysisResult;
use crate::tasks::orchestrator::OrchestratorStats;
use crate::tasks::store::{TaskOutcome, TaskStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks this sweep moved to Failed
    pub failed: usize,
    pub evicted: usize,
}

/// Periodic backstop: fails tasks stuck in Processing past the ceiling and
/// evicts terminal tasks past the retention window
pub struct Supervisor {
    store: Arc<dyn TaskStore>,
    stats: Arc<OrchestratorStats>,
    period: Duration,
    ceiling_ms: u64,
    backoff: Duration,
    retention_ms: u64,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        stats: Arc<OrchestratorStats>,
        config: &SupervisorConfig,
    ) -> Self {
        Self {
            store,
            stats,
            period: Duration::from_millis(config.period_ms),
            ceiling_ms: config.ceiling_ms,
            backoff: Duration::from_millis(config.backoff_ms),
            retention_ms: config.retention_ms,
        }
    }

    pub fn timeout_cause(&self) -> String {
        format!("supervisor timeout: task exceeded {}ms", self.ceiling_ms)
    }

    /// One pass over the store as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let cutoff = now - chrono::Duration::milliseconds(self.ceiling_ms as i64);
        for task in self.store.stale_processing(cutoff).await? {
            let cause = self.timeout_cause();
            let outcome = TaskOutcome::Failed {
                error: cause.clone(),
                result: AnalysisResult::failed(task.mode, cause),
            };
            if self.store.complete(&task.id, outcome, now).await? {
                self.stats.record_supervisor_failure();
                report.failed += 1;
                tracing::warn!(
                    task_id = %task.id,
                    age_ms = (now - task.started_at).num_milliseconds(),
                    "task exceeded supervisor ceiling, marked failed"
                );
            }
        }

        let retention_cutoff = now - chrono::Duration::milliseconds(self.retention_ms as i64);
        report.evicted = self.store.evict_terminal(retention_cutoff).await?;
        Ok(report)
    }

    /// Sweep every period until `shutdown` fires. A failing or panicking
    /// sweep is logged and followed by a backoff; it never ends the loop.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            period_ms = self.period.as_millis() as u64,
            ceiling_ms = self.ceiling_ms,
            "supervisor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let failed = match AssertUnwindSafe(self.sweep(Utc::now()))
                .catch_unwind()
                .await
            {
                Ok(Ok(report)) => {
                    if report.failed > 0 || report.evicted > 0 {
                        tracing::debug!(
                            failed = report.failed,
                            evicted = report.evicted,
                            "supervisor sweep"
                        );
                    }
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!("supervisor sweep failed: {}", e);
                    true
                }
                Err(_) => {
                    tracing::error!("supervisor sweep panicked");
                    true
                }
            };

            if failed {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }
        tracing::info!("supervisor stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
