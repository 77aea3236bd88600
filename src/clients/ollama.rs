use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::clients::traits::{Generation, GenerationError, Generator, GeneratorInfo};
use crate::config::GenerationConfig;
use crate::context::AnalysisContext;
use crate::error::{Result, VortexError};
use crate::prompts::{WARMUP_PROMPT, build_prompt};
use crate::result::GenerationMetrics;
use crate::utils::truncate_chars;

/// Error bodies are echoed back to callers only up to this many chars
const ERROR_BODY_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    eval_count: Option<u64>,
    prompt_eval_count: Option<u64>,
}

/// Client for a local Ollama daemon (`POST /api/generate`, non-streaming, JSON format)
#[derive(Clone, Debug)]
pub struct OllamaClient {
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: Client,
}

impl OllamaClient {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| VortexError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            client,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint)
    }

    /// Send one prompt and wait for the whole answer
    pub async fn generate(&self, prompt: &str) -> std::result::Result<Generation, GenerationError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            }
        });

        let started = Instant::now();
        let res = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(GenerationError::Other(format!(
                "model endpoint returned {}: {}",
                status,
                truncate_chars(&text, ERROR_BODY_EXCERPT_CHARS)
            )));
        }

        let payload: GenerateResponse = res.json().await.map_err(|e| {
            if e.is_timeout() {
                self.timed_out()
            } else {
                GenerationError::Other(format!("malformed model response: {}", e))
            }
        })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let raw_text = payload.response.ok_or_else(|| {
            GenerationError::Other("model response has no 'response' field".into())
        })?;

        tracing::debug!(
            model = %self.model,
            latency_ms,
            tokens = ?payload.eval_count,
            "generation complete"
        );

        Ok(Generation {
            raw_text,
            metrics: GenerationMetrics {
                latency_ms,
                token_count: payload.eval_count,
                prompt_tokens: payload.prompt_eval_count,
            },
        })
    }

    fn timed_out(&self) -> GenerationError {
        GenerationError::TimedOut {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn classify(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            self.timed_out()
        } else if err.is_connect() {
            GenerationError::Unreachable {
                endpoint: self.endpoint.clone(),
            }
        } else {
            GenerationError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn invoke(
        &self,
        context: &AnalysisContext,
    ) -> std::result::Result<Generation, GenerationError> {
        self.generate(&build_prompt(context)).await
    }

    async fn warm_up(&self) -> std::result::Result<Generation, GenerationError> {
        self.generate(WARMUP_PROMPT).await
    }

    fn describe(&self) -> GeneratorInfo {
        GeneratorInfo {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_normalized() {
        let config = GenerationConfig {
            endpoint: "http://localhost:11434/".into(),
            ..GenerationConfig::default()
        };
        let client = OllamaClient::from_config(&config).unwrap();
        assert_eq!(client.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(client.describe().model, config.model);
    }
}
