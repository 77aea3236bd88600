//! Server module wiring the analysis pipeline together

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::analyzer::ClinicalAnalyzer;
use crate::clients::{Generator, GeneratorInfo, OllamaClient};
use crate::config::Config;
use crate::error::Result;
use crate::patterns::{PatternMatcher, SignalLedger};
use crate::tasks::{InMemoryTaskStore, OrchestratorStats, Supervisor, TaskOrchestrator, TaskStore};
use crate::throttle::ThrottlePolicy;

/// Outcome of the one-time startup warm-up call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warmup", rename_all = "lowercase")]
pub enum WarmupState {
    Pending,
    Ready { latency_ms: u64 },
    Failed { detail: String },
}

/// Write-once warm-up flag; the first recorded outcome sticks
#[derive(Debug, Default)]
pub struct WarmupTracker {
    outcome: OnceLock<WarmupState>,
}

impl WarmupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an outcome was already recorded
    pub fn finish(&self, state: WarmupState) -> bool {
        self.outcome.set(state).is_ok()
    }

    pub fn state(&self) -> WarmupState {
        self.outcome.get().cloned().unwrap_or(WarmupState::Pending)
    }

    pub fn is_warm(&self) -> bool {
        matches!(self.outcome.get(), Some(WarmupState::Ready { .. }))
    }
}

/// Everything the HTTP layer needs, cheap to clone
#[derive(Clone)]
pub struct VortexServer {
    pub config: Arc<Config>,
    pub orchestrator: TaskOrchestrator,
    pub supervisor: Arc<Supervisor>,
    pub generator: Arc<dyn Generator>,
    pub ledger: Arc<SignalLedger>,
    pub warmup: Arc<WarmupTracker>,
}

impl VortexServer {
    /// Build the server around an Ollama client from `config`
    pub fn new(config: Config) -> Result<Self> {
        let generator: Arc<dyn Generator> = Arc::new(OllamaClient::from_config(&config.generation)?);
        Self::with_generator(config, generator)
    }

    /// Build the server around any generator (in-process fakes in tests)
    pub fn with_generator(config: Config, generator: Arc<dyn Generator>) -> Result<Self> {
        let matcher = Arc::new(PatternMatcher::new(&config.patterns)?);
        let ledger = Arc::new(SignalLedger::new());
        let analyzer = Arc::new(ClinicalAnalyzer::new(
            Arc::clone(&generator),
            matcher,
            ThrottlePolicy::from(&config.throttle),
            Arc::clone(&ledger),
        ));

        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let stats = Arc::new(OrchestratorStats::default());
        let orchestrator = TaskOrchestrator::new(Arc::clone(&store), analyzer, Arc::clone(&stats));
        let supervisor = Arc::new(Supervisor::new(store, stats, &config.supervisor));

        Ok(Self {
            config: Arc::new(config),
            orchestrator,
            supervisor,
            generator,
            ledger,
            warmup: Arc::new(WarmupTracker::new()),
        })
    }

    pub fn generator_info(&self) -> GeneratorInfo {
        self.generator.describe()
    }

    /// Spawn the supervisor loop and, if enabled, the warm-up call
    pub fn start_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![Arc::clone(&self.supervisor).spawn(shutdown)];
        if self.config.generation.warmup {
            handles.push(self.spawn_warmup());
        } else {
            tracing::info!("model warm-up disabled");
        }
        handles
    }

    pub fn spawn_warmup(&self) -> JoinHandle<()> {
        let generator = Arc::clone(&self.generator);
        let tracker = Arc::clone(&self.warmup);
        tokio::spawn(async move {
            let info = generator.describe();
            tracing::info!(model = %info.model, "warming up model");
            let state = match generator.warm_up().await {
                Ok(generation) => {
                    tracing::info!(latency_ms = generation.metrics.latency_ms, "model warm");
                    WarmupState::Ready {
                        latency_ms: generation.metrics.latency_ms,
                    }
                }
                Err(e) => {
                    tracing::warn!("model warm-up failed: {}", e);
                    WarmupState::Failed {
                        detail: e.to_string(),
                    }
                }
            };
            tracker.finish(state);
        })
    }
}
