//! One analysis end to end: precondition, throttle, generate, validate,
//! normalize, annotate. Every path ends in an [`AnalysisResult`].

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::clients::{Generation, Generator};
use crate::context::{AnalysisContext, AnalysisMode};
use crate::normalizer;
use crate::patterns::{PatternMatcher, SignalLedger};
use crate::result::AnalysisResult;
use crate::throttle::{ThrottleController, ThrottleDecision, ThrottlePolicy};

pub struct ClinicalAnalyzer {
    generator: Arc<dyn Generator>,
    matcher: Arc<PatternMatcher>,
    throttle: Mutex<ThrottleController>,
    ledger: Arc<SignalLedger>,
}

impl ClinicalAnalyzer {
    pub fn new(
        generator: Arc<dyn Generator>,
        matcher: Arc<PatternMatcher>,
        policy: ThrottlePolicy,
        ledger: Arc<SignalLedger>,
    ) -> Self {
        Self {
            generator,
            matcher,
            throttle: Mutex::new(ThrottleController::new(policy)),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<SignalLedger> {
        &self.ledger
    }

    pub async fn run(&self, context: &AnalysisContext, force: bool) -> AnalysisResult {
        self.run_at(context, force, Instant::now()).await
    }

    /// [`run`](Self::run) with an explicit clock reading for the throttle
    pub async fn run_at(
        &self,
        context: &AnalysisContext,
        force: bool,
        now: Instant,
    ) -> AnalysisResult {
        let mode = context.mode();

        let missing = context.missing_mandatory();
        if !missing.is_empty() {
            tracing::debug!(?missing, "context insufficient, skipping model call");
            return AnalysisResult::insufficient(mode, missing)
                .with_clinical_phase(context.clinical_phase());
        }

        // Lock is released before the model call; only decide and record hold it.
        let decision = self.throttle.lock().await.decide(context, now, force);
        if let ThrottleDecision::Cached(cached) = decision {
            tracing::debug!(
                fingerprint = %context.fingerprint().to_hex(),
                "throttled, serving cached result"
            );
            return cached;
        }

        let result = match self.generator.invoke(context).await {
            Ok(generation) => self.interpret(mode, generation),
            Err(err) => {
                tracing::warn!(kind = err.kind(), "generation failed: {}", err);
                AnalysisResult::generation_failed(mode, &err)
            }
        }
        .with_clinical_phase(context.clinical_phase());

        if let Some(signals) = &result.cognitive_signals {
            self.ledger.record(signals);
        }

        let recorded = self.throttle.lock().await.record(context, now, &result);
        if !recorded {
            tracing::debug!("newer run already recorded, throttle state left as is");
        }
        result
    }

    /// Turn raw model text into a result: validate, then normalize and annotate
    pub fn interpret(&self, mode: AnalysisMode, generation: Generation) -> AnalysisResult {
        let Generation { raw_text, metrics } = generation;

        let validation = self.matcher.validate(&raw_text);
        if !validation.ok {
            let reason = validation
                .reason
                .unwrap_or_else(|| "response violated output contract".to_string());
            tracing::warn!(%mode, "discarding model output: {}", reason);
            let mut result =
                AnalysisResult::contract_violation(mode, reason).with_raw_response(&raw_text);
            result.metrics = Some(metrics);
            return result;
        }

        let mut result = normalizer::parse(mode, &raw_text).with_raw_response(&raw_text);
        result.metrics = Some(metrics);
        result.cognitive_signals = Some(self.matcher.signals(&raw_text));
        result
    }
}
