//! Analysis context: the immutable set of clinical fields supplied for one analysis
//!
//! A context is identified structurally. Its canonical serialization (sorted
//! keys, mode included) is hashed with blake3 into a [`Fingerprint`], which the
//! throttle and the task store use to detect "nothing changed" cheaply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::error::{Result, VortexError};
use crate::utils::non_blank;

/// Fields that must carry text before the model is worth calling
pub const MANDATORY_FIELDS: &[&str] = &["clinical_text"];

/// Phase reported when the caller does not supply one
pub const DEFAULT_CLINICAL_PHASE: &str = "experimental";

/// Which opinion the model is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Senior-internist case discussion: scenarios ranked by urgency
    #[default]
    Clinical,
    /// Second look at a working hypothesis: what would change the plan
    Pivot,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Clinical => "clinical",
            AnalysisMode::Pivot => "pivot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "clinical" | "clinico" | "clínico" => Some(AnalysisMode::Clinical),
            "pivot" | "second_look" => Some(AnalysisMode::Pivot),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable summary of a context: content hash plus serialized length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: [u8; 32],
    chars: usize,
}

impl Fingerprint {
    fn of(canonical: &str) -> Self {
        Self {
            digest: *blake3::hash(canonical.as_bytes()).as_bytes(),
            chars: canonical.chars().count(),
        }
    }

    /// Absolute character-count delta, a cheap proxy for edit distance
    pub fn char_delta(&self, other: &Fingerprint) -> usize {
        self.chars.abs_diff(other.chars)
    }

    pub fn same_content(&self, other: &Fingerprint) -> bool {
        self.digest == other.digest
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.digest).to_hex().to_string()
    }
}

/// Immutable mapping of named clinical fields for one analysis
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    mode: AnalysisMode,
    fields: BTreeMap<String, Value>,
    fingerprint: Fingerprint,
}

impl AnalysisContext {
    pub fn new<I, K>(mode: AnalysisMode, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let fields: BTreeMap<String, Value> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let canonical = json!({ "mode": mode, "fields": fields }).to_string();
        Self {
            mode,
            fingerprint: Fingerprint::of(&canonical),
            fields,
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Printable form of a field, or `None` when absent, null, or blank
    pub fn display_value(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Null => None,
            Value::String(s) => non_blank(s).map(str::to_string),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Mandatory fields that are absent or blank
    pub fn missing_mandatory(&self) -> Vec<String> {
        MANDATORY_FIELDS
            .iter()
            .filter(|field| self.display_value(field).is_none())
            .map(|field| field.to_string())
            .collect()
    }

    pub fn clinical_phase(&self) -> String {
        self.display_value("clinical_phase")
            .unwrap_or_else(|| DEFAULT_CLINICAL_PHASE.to_string())
    }
}

/// One submission: a context plus the caller's force flag
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub context: AnalysisContext,
    pub force: bool,
}

impl AnalysisRequest {
    /// Decode a submission body.
    ///
    /// Accepts either flat fields (`{"clinical_text": .., "force": true}`) or a
    /// nested `context` object. `force` and `mode` are control keys and never
    /// become part of the context.
    pub fn from_json(body: Value) -> Result<Self> {
        let Value::Object(mut body) = body else {
            return Err(VortexError::InvalidParams {
                message: "submission body must be a JSON object".into(),
            });
        };

        let force = match body.remove("force") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "true"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            Some(other) => {
                return Err(VortexError::InvalidParams {
                    message: format!("invalid force flag: {}", other),
                });
            }
        };

        let mode = match body.remove("mode") {
            None | Some(Value::Null) => AnalysisMode::default(),
            Some(Value::String(s)) => {
                AnalysisMode::parse(&s).ok_or_else(|| VortexError::InvalidParams {
                    message: format!("unknown analysis mode '{}'", s),
                })?
            }
            Some(other) => {
                return Err(VortexError::InvalidParams {
                    message: format!("invalid mode: {}", other),
                });
            }
        };

        let fields: Map<String, Value> = match body.remove("context") {
            Some(Value::Object(nested)) => nested,
            Some(Value::Null) | None => body,
            Some(other) => {
                return Err(VortexError::InvalidParams {
                    message: format!("context must be an object, got {}", other),
                });
            }
        };

        Ok(Self {
            context: AnalysisContext::new(mode, fields),
            force,
        })
    }
}
