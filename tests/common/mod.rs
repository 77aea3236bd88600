#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vortex_observer::clients::{Generation, GenerationError, Generator, GeneratorInfo};
use vortex_observer::context::AnalysisContext;
use vortex_observer::result::GenerationMetrics;
use vortex_observer::server::VortexServer;
use vortex_observer::tasks::PollOutcome;
use vortex_observer::Config;

/// What the scripted generator does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(GenerationError),
    /// Reply after a delay
    Delay(Duration, String),
    /// Never answer
    Hang,
    Panic,
}

/// In-process generator that plays back a fixed script; the last step repeats
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(raw: &str) -> Self {
        Self::new([Step::Reply(raw.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let next = self.steps.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or(Step::Hang),
        }
    }
}

fn generation(raw: String) -> Generation {
    Generation {
        raw_text: raw,
        metrics: GenerationMetrics {
            latency_ms: 5,
            token_count: Some(64),
            prompt_tokens: Some(200),
        },
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn invoke(&self, _context: &AnalysisContext) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply(raw) => Ok(generation(raw)),
            Step::Fail(err) => Err(err),
            Step::Delay(delay, raw) => {
                tokio::time::sleep(delay).await;
                Ok(generation(raw))
            }
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted generator panic"),
        }
    }

    fn describe(&self) -> GeneratorInfo {
        GeneratorInfo {
            model: "scripted".into(),
            endpoint: "memory://scripted".into(),
        }
    }
}

pub fn server_with(generator: std::sync::Arc<ScriptedGenerator>) -> VortexServer {
    VortexServer::with_generator(Config::default(), generator).unwrap()
}

/// Poll until the task leaves Processing, failing the test after `limit`
pub async fn wait_terminal(server: &VortexServer, task_id: &str, limit: Duration) -> PollOutcome {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let outcome = server.orchestrator.poll(task_id).await.unwrap();
        if outcome != PollOutcome::Processing {
            return outcome;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} still processing after {:?}",
            task_id,
            limit
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
