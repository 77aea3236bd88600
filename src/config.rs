use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, VortexError};
use crate::patterns::{
    DEFAULT_CONTRADICTION_PATTERNS, DEFAULT_FABRICATION_PATTERNS, DEFAULT_FORBIDDEN_OPENINGS,
    DEFAULT_OVERGENERALIZATION_PATTERNS, DEFAULT_UNCERTAINTY_PATTERNS, PatternMatcher,
};

/// Main configuration structure loaded from vortex.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Local model service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Send one tiny request at startup so the first real analysis is not a cold load
    pub warmup: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434".to_string(),
            model: "qwen2.5:3b".to_string(),
            timeout_ms: 45_000,
            temperature: 0.2,
            max_tokens: 900,
            warmup: true,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Minimum spacing and minimum edit size between model runs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_interval_ms: u64,
    pub min_chars_change: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 2_000,
            min_chars_change: 20,
        }
    }
}

/// Background sweep that fails stuck tasks and evicts old ones
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub period_ms: u64,
    /// A task processing longer than this is declared failed
    pub ceiling_ms: u64,
    /// Pause after a failed sweep before the next attempt
    pub backoff_ms: u64,
    /// Terminal tasks older than this are evicted
    pub retention_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            period_ms: 12_000,
            ceiling_ms: 60_000,
            backoff_ms: 1_000,
            retention_ms: 900_000,
        }
    }
}

/// Regex pattern sets for signal extraction and output validation
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PatternConfig {
    pub uncertainty: Vec<String>,
    pub contradiction: Vec<String>,
    pub overgeneralization: Vec<String>,
    pub fabrication: Vec<String>,
    pub forbidden_openings: Vec<String>,
}

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            uncertainty: owned(DEFAULT_UNCERTAINTY_PATTERNS),
            contradiction: owned(DEFAULT_CONTRADICTION_PATTERNS),
            overgeneralization: owned(DEFAULT_OVERGENERALIZATION_PATTERNS),
            fabrication: owned(DEFAULT_FABRICATION_PATTERNS),
            forbidden_openings: owned(DEFAULT_FORBIDDEN_OPENINGS),
        }
    }
}

/// Process-level settings that only come from the environment
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub http_bind: String,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_bind: "127.0.0.1:8090".to_string(),
            log_level: "vortex_observer=info,tower_http=info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_bind: std::env::var("VORTEX_HTTP_BIND").unwrap_or(defaults.http_bind),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }
}

fn load_env_file_from(path: &Path) -> bool {
    dotenvy::from_path(path).is_ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Export `VORTEX_ENV_FILE` (default `.env`) into the process environment.
    /// Variables already set are kept; calling this again is harmless.
    pub fn load_env_file() {
        let path = std::env::var("VORTEX_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
        load_env_file_from(Path::new(&path));
    }

    /// Load configuration from the env file, a TOML file, and environment variables.
    /// An explicit `path` wins over VORTEX_CONFIG, which defaults to "vortex.toml".
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        Self::load_env_file();

        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var("VORTEX_CONFIG").ok())
            .unwrap_or_else(|| "vortex.toml".to_string());

        let mut config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Environment wins over the file (env-first)
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.generation.endpoint = url.trim_end_matches('/').to_string();
            tracing::debug!("OLLAMA_URL env override applied");
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.generation.model = model;
        }
        if let Some(v) = env_parse("OLLAMA_TIMEOUT_MS") {
            self.generation.timeout_ms = v;
        }
        if let Some(v) = env_parse("VORTEX_TEMPERATURE") {
            self.generation.temperature = v;
        }
        if let Some(v) = env_parse("VORTEX_MAX_TOKENS") {
            self.generation.max_tokens = v;
        }
        if let Some(v) = env_parse("VORTEX_THROTTLE_INTERVAL_MS") {
            self.throttle.min_interval_ms = v;
        }
        if let Some(v) = env_parse("VORTEX_THROTTLE_MIN_CHARS") {
            self.throttle.min_chars_change = v;
        }
        if let Some(v) = env_parse("VORTEX_SUPERVISOR_PERIOD_MS") {
            self.supervisor.period_ms = v;
        }
        if let Some(v) = env_parse("VORTEX_SUPERVISOR_CEILING_MS") {
            self.supervisor.ceiling_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if !generation.endpoint.starts_with("http://") && !generation.endpoint.starts_with("https://")
        {
            return Err(VortexError::Config {
                message: format!(
                    "generation endpoint '{}' must start with http:// or https://",
                    generation.endpoint
                ),
            });
        }
        if generation.model.trim().is_empty() {
            return Err(VortexError::Config {
                message: "generation model must not be empty".into(),
            });
        }
        if generation.timeout_ms == 0 {
            return Err(VortexError::Config {
                message: "generation timeout_ms must be positive".into(),
            });
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(VortexError::Config {
                message: format!("temperature {} outside [0, 2]", generation.temperature),
            });
        }
        if self.supervisor.period_ms == 0 || self.supervisor.ceiling_ms == 0 {
            return Err(VortexError::Config {
                message: "supervisor period_ms and ceiling_ms must be positive".into(),
            });
        }
        if self.supervisor.ceiling_ms <= generation.timeout_ms {
            tracing::warn!(
                "supervisor ceiling {}ms does not exceed generation timeout {}ms; slow runs will be failed by the supervisor",
                self.supervisor.ceiling_ms,
                generation.timeout_ms
            );
        }
        PatternMatcher::new(&self.patterns)?;
        Ok(())
    }
}
