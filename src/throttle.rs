//! Admission control for model runs
//!
//! A run is admitted when the caller forces it, when enough time has passed
//! since the last run, or when the context changed by enough characters. A
//! context byte-identical to the last served one is never re-run, forced or not.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;
use crate::context::{AnalysisContext, AnalysisMode, Fingerprint};
use crate::result::AnalysisResult;

#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub min_interval: Duration,
    pub min_chars_change: usize,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::from(&ThrottleConfig::default())
    }
}

impl From<&ThrottleConfig> for ThrottlePolicy {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            min_chars_change: config.min_chars_change,
        }
    }
}

/// What the last completed run left behind
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    pub last_run_at: Option<Instant>,
    pub last_fingerprint: Option<Fingerprint>,
    pub cached_result: Option<AnalysisResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    Run,
    /// Suppressed; serve this instead
    Cached(AnalysisResult),
}

/// Per-analyzer throttle with one state slot per analysis mode.
///
/// Not synchronized; callers sharing one controller serialize access.
#[derive(Debug, Default)]
pub struct ThrottleController {
    policy: ThrottlePolicy,
    states: HashMap<AnalysisMode, ThrottleState>,
}

impl ThrottleController {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, mode: AnalysisMode) -> Option<&ThrottleState> {
        self.states.get(&mode)
    }

    pub fn should_run(&self, context: &AnalysisContext, now: Instant, force: bool) -> bool {
        let incoming = context.fingerprint();
        let Some(state) = self.states.get(&context.mode()) else {
            return true;
        };
        if state
            .last_fingerprint
            .is_some_and(|last| last.same_content(&incoming))
        {
            return false;
        }
        if force {
            return true;
        }
        let (Some(last_run_at), Some(last)) = (state.last_run_at, state.last_fingerprint) else {
            return true;
        };
        now.saturating_duration_since(last_run_at) >= self.policy.min_interval
            || incoming.char_delta(&last) >= self.policy.min_chars_change
    }

    /// `should_run` plus the result to serve when suppressed
    pub fn decide(&self, context: &AnalysisContext, now: Instant, force: bool) -> ThrottleDecision {
        if self.should_run(context, now, force) {
            return ThrottleDecision::Run;
        }
        let cached = self
            .states
            .get(&context.mode())
            .and_then(|state| state.cached_result.clone())
            .unwrap_or_else(|| AnalysisResult::waiting(context.mode()));
        ThrottleDecision::Cached(cached)
    }

    /// Store the outcome of a run that started at `run_started`.
    ///
    /// Returns false when a newer run has already been recorded. An error
    /// outcome is cached but leaves no fingerprint, so the same context is
    /// admitted again on the next request.
    pub fn record(
        &mut self,
        context: &AnalysisContext,
        run_started: Instant,
        result: &AnalysisResult,
    ) -> bool {
        let state = self.states.entry(context.mode()).or_default();
        if state.last_run_at.is_some_and(|last| run_started < last) {
            return false;
        }
        state.last_run_at = Some(run_started);
        state.last_fingerprint = if result.is_error() {
            None
        } else {
            Some(context.fingerprint())
        };
        state.cached_result = Some(result.clone());
        true
    }
}
