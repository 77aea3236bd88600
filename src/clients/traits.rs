use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::context::AnalysisContext;
use crate::result::GenerationMetrics;

/// Raw model output for one invocation, before any interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub raw_text: String,
    pub metrics: GenerationMetrics,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("model service unreachable at {endpoint}")]
    Unreachable { endpoint: String },
    #[error("model call timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("model call failed: {0}")]
    Other(String),
}

impl GenerationError {
    /// Short machine-readable tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Unreachable { .. } => "unreachable",
            GenerationError::TimedOut { .. } => "timed_out",
            GenerationError::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorInfo {
    pub model: String,
    pub endpoint: String,
}

/// One bounded request/response exchange with a text-generation model
#[async_trait]
pub trait Generator: Send + Sync {
    /// Build the prompt for `context` and return the model's raw text
    async fn invoke(&self, context: &AnalysisContext) -> Result<Generation, GenerationError>;

    /// Load the model ahead of the first real request
    async fn warm_up(&self) -> Result<Generation, GenerationError> {
        Ok(Generation {
            raw_text: String::new(),
            metrics: GenerationMetrics::default(),
        })
    }

    fn describe(&self) -> GeneratorInfo;
}
