//! Canonical analysis result shared by the analyzer, the task store, and the HTTP layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clients::GenerationError;
use crate::context::AnalysisMode;
use crate::normalizer::schema_for;
use crate::utils::truncate_chars;

/// Cap on the reply sample kept in [`AnalysisResult::raw_excerpt`]
pub const RAW_EXCERPT_CHARS: usize = 1000;

/// Triage semaphore shown to the clinician
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Red,
    Yellow,
    Green,
    Gray,
}

/// Whether the model produced something usable for this result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmStatus {
    Ok,
    Waiting,
    Error,
}

/// One normalized list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Item {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            rationale: None,
            action: None,
        }
    }
}

/// Latency and usage for one generation call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Moderate,
    Low,
}

impl ConfidenceBucket {
    /// 0 uncertainty markers => high, 1-2 => moderate, 3+ => low
    pub fn from_uncertainty(count: usize) -> Self {
        match count {
            0 => ConfidenceBucket::High,
            1..=2 => ConfidenceBucket::Moderate,
            _ => ConfidenceBucket::Low,
        }
    }
}

/// Behavioral signals extracted from raw model text. Telemetry only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitiveSignals {
    pub uncertainty_count: usize,
    pub contradiction_count: usize,
    pub overgeneralization_count: usize,
    pub fabrication_count: usize,
    pub confidence_bucket: ConfidenceBucket,
    /// Matched fragments per category
    pub markers: BTreeMap<String, Vec<String>>,
}

/// Canonical output of one analysis
///
/// Every declared list of the result's mode is always present, possibly empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub mode: AnalysisMode,
    #[serde(flatten)]
    pub lists: BTreeMap<String, Vec<Item>>,
    pub severity: Severity,
    pub llm_status: LlmStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GenerationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_signals: Option<CognitiveSignals>,
    /// Length in characters of the model reply this result was built from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    /// Bounded sample of that reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_phase: Option<String>,
}

impl AnalysisResult {
    /// All declared lists empty, no diagnostics
    pub fn empty(mode: AnalysisMode, severity: Severity, llm_status: LlmStatus) -> Self {
        Self {
            mode,
            lists: schema_for(mode).empty_lists(),
            severity,
            llm_status,
            metrics: None,
            cognitive_signals: None,
            response_length: None,
            raw_excerpt: None,
            parse_error: None,
            validation_error: None,
            llm_error: None,
            missing_context: Vec::new(),
            clinical_phase: None,
        }
    }

    /// Neutral placeholder served before any run has completed
    pub fn waiting(mode: AnalysisMode) -> Self {
        Self::empty(mode, Severity::Gray, LlmStatus::Waiting)
    }

    /// Context lacks mandatory fields; the model was not called
    pub fn insufficient(mode: AnalysisMode, missing: Vec<String>) -> Self {
        let mut result = Self::waiting(mode);
        result.missing_context = missing;
        result
    }

    pub fn generation_failed(mode: AnalysisMode, err: &GenerationError) -> Self {
        Self::failed(mode, err.to_string())
    }

    /// Terminal error shape with a human-readable cause
    pub fn failed(mode: AnalysisMode, cause: impl Into<String>) -> Self {
        let mut result = Self::empty(mode, Severity::Gray, LlmStatus::Error);
        result.llm_error = Some(cause.into());
        result
    }

    /// Model answered but broke its output contract; the answer is discarded
    pub fn contract_violation(mode: AnalysisMode, reason: impl Into<String>) -> Self {
        let mut result = Self::empty(mode, Severity::Yellow, LlmStatus::Ok);
        result.validation_error = Some(reason.into());
        result
    }

    /// Attach length and a capped sample of the reply this result came from
    pub fn with_raw_response(mut self, raw_text: &str) -> Self {
        self.response_length = Some(raw_text.chars().count());
        self.raw_excerpt = Some(truncate_chars(raw_text.trim(), RAW_EXCERPT_CHARS).to_string());
        self
    }

    pub fn with_clinical_phase(mut self, phase: impl Into<String>) -> Self {
        self.clinical_phase = Some(phase.into());
        self
    }

    pub fn list(&self, name: &str) -> &[Item] {
        self.lists.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_items(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_error(&self) -> bool {
        self.llm_status == LlmStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(ConfidenceBucket::from_uncertainty(0), ConfidenceBucket::High);
        assert_eq!(ConfidenceBucket::from_uncertainty(1), ConfidenceBucket::Moderate);
        assert_eq!(ConfidenceBucket::from_uncertainty(2), ConfidenceBucket::Moderate);
        assert_eq!(ConfidenceBucket::from_uncertainty(3), ConfidenceBucket::Low);
    }

    #[test]
    fn test_raw_excerpt_is_capped() {
        let reply = format!("  {}", "ñ".repeat(RAW_EXCERPT_CHARS + 250));
        let result = AnalysisResult::waiting(AnalysisMode::Clinical).with_raw_response(&reply);
        assert_eq!(result.response_length, Some(RAW_EXCERPT_CHARS + 252));
        let excerpt = result.raw_excerpt.unwrap();
        assert_eq!(excerpt.chars().count(), RAW_EXCERPT_CHARS);
        assert!(excerpt.starts_with('ñ'));
    }

    #[test]
    fn test_reply_telemetry_omitted_when_absent() {
        let value = serde_json::to_value(AnalysisResult::waiting(AnalysisMode::Pivot)).unwrap();
        assert!(value.get("raw_excerpt").is_none());
        assert!(value.get("response_length").is_none());
    }

    #[test]
    fn test_waiting_placeholder_has_every_list() {
        let result = AnalysisResult::waiting(AnalysisMode::Clinical);
        let value = serde_json::to_value(&result).unwrap();
        for field in schema_for(AnalysisMode::Clinical).field_names() {
            assert!(value[field].is_array(), "{} should be a list", field);
        }
        assert_eq!(value["severity"], "gray");
        assert_eq!(value["llm_status"], "waiting");
        assert!(value.get("missing_context").is_none());
    }

    #[test]
    fn test_failed_shape() {
        let err = GenerationError::TimedOut { timeout_ms: 100 };
        let result = AnalysisResult::generation_failed(AnalysisMode::Pivot, &err);
        assert!(result.is_error());
        assert_eq!(result.severity, Severity::Gray);
        assert_eq!(result.total_items(), 0);
        assert!(result.llm_error.unwrap().contains("100ms"));
    }
}
