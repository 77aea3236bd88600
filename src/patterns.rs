//! Fixed-pattern linguistic signal detection over raw model text
//!
//! Two disjoint pattern families live here:
//! - signal categories (uncertainty, contradiction, overgeneralization,
//!   fabrication) counted for research telemetry
//! - forbidden openings: phrasings that restate the case instead of adding
//!   judgement; a match invalidates the whole response
//!
//! The pattern lists are configuration data ([`PatternConfig`]); this module only
//! compiles and applies them. Matching is case-insensitive and never fails.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::config::PatternConfig;
use crate::error::Result;
use crate::result::{CognitiveSignals, ConfidenceBucket};

pub const DEFAULT_UNCERTAINTY_PATTERNS: &[&str] = &[
    r"no estoy seguro",
    r"podr[ií]a ser",
    r"es posible que",
    r"no tengo certeza",
    r"dif[ií]cil determinar",
    r"insuficiente informaci[oó]n",
    r"requiere m[aá]s datos",
    r"no puedo confirmar",
    r"\bpossibly\b",
    r"\buncertain\b",
    r"\bmaybe\b",
];

pub const DEFAULT_CONTRADICTION_PATTERNS: &[&str] = &[
    r"sin embargo.*pero",
    r"aunque.*no obstante",
    r"por un lado.*por otro",
    r"contradictorio",
];

pub const DEFAULT_OVERGENERALIZATION_PATTERNS: &[&str] = &[
    r"\bsiempre\b",
    r"\bnunca\b",
    r"todos los pacientes",
    r"en todos los casos",
    r"invariablemente",
    r"sin excepci[oó]n",
];

pub const DEFAULT_FABRICATION_PATTERNS: &[&str] = &[
    r"seg[uú]n estudios recientes",
    r"investigaciones demuestran",
    r"est[aá] comprobado que",
    r"la literatura indica",
    r"estudios han mostrado",
];

/// Openings that restate the input. Anchored to the start of the response by the matcher.
pub const DEFAULT_FORBIDDEN_OPENINGS: &[&str] = &[
    r"el paciente presenta",
    r"la paciente presenta",
    r"paciente (masculino|femenino|de \d+ años)",
    r"se trata de una? paciente",
    r"seg[uú]n (lo descrito|la informaci[oó]n proporcionada)",
    r"como se (menciona|describe) en el caso",
    r"el caso (describe|presenta)",
    r"the patient presents",
];

/// Signal category counted in [`CognitiveSignals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Uncertainty,
    Contradiction,
    Overgeneralization,
    Fabrication,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 4] = [
        SignalCategory::Uncertainty,
        SignalCategory::Contradiction,
        SignalCategory::Overgeneralization,
        SignalCategory::Fabrication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Uncertainty => "uncertainty",
            SignalCategory::Contradiction => "contradiction",
            SignalCategory::Overgeneralization => "overgeneralization",
            SignalCategory::Fabrication => "fabrication",
        }
    }
}

/// Outcome of forbidden-opening validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn passed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }
}

/// Compiled pattern sets
#[derive(Debug)]
pub struct PatternMatcher {
    categories: Vec<(SignalCategory, Vec<Regex>)>,
    forbidden: Vec<Regex>,
}

impl PatternMatcher {
    pub fn new(config: &PatternConfig) -> Result<Self> {
        let categories = vec![
            (SignalCategory::Uncertainty, compile(&config.uncertainty, false)?),
            (SignalCategory::Contradiction, compile(&config.contradiction, false)?),
            (
                SignalCategory::Overgeneralization,
                compile(&config.overgeneralization, false)?,
            ),
            (SignalCategory::Fabrication, compile(&config.fabrication, false)?),
        ];
        Ok(Self {
            categories,
            forbidden: compile(&config.forbidden_openings, true)?,
        })
    }

    /// Matched fragments per category; every category is present, possibly empty
    pub fn scan(&self, text: &str) -> BTreeMap<SignalCategory, Vec<String>> {
        self.categories
            .iter()
            .map(|(category, patterns)| {
                let fragments = patterns
                    .iter()
                    .flat_map(|re| re.find_iter(text))
                    .map(|m| m.as_str().to_lowercase())
                    .collect();
                (*category, fragments)
            })
            .collect()
    }

    /// Aggregate [`scan`](Self::scan) into counts plus a confidence bucket
    pub fn signals(&self, text: &str) -> CognitiveSignals {
        let scan = self.scan(text);
        let count = |category: SignalCategory| scan.get(&category).map_or(0, Vec::len);
        let uncertainty_count = count(SignalCategory::Uncertainty);
        CognitiveSignals {
            uncertainty_count,
            contradiction_count: count(SignalCategory::Contradiction),
            overgeneralization_count: count(SignalCategory::Overgeneralization),
            fabrication_count: count(SignalCategory::Fabrication),
            confidence_bucket: ConfidenceBucket::from_uncertainty(uncertainty_count),
            markers: scan
                .into_iter()
                .map(|(category, fragments)| (category.as_str().to_string(), fragments))
                .collect(),
        }
    }

    /// Reject text whose opening restates the case
    pub fn validate(&self, text: &str) -> Validation {
        for re in &self.forbidden {
            if let Some(m) = re.find(text) {
                let fragment = m.as_str().trim_start_matches(|c: char| {
                    c.is_whitespace() || matches!(c, '"' | '\'' | '{' | '[')
                });
                return Validation {
                    ok: false,
                    reason: Some(format!(
                        "response opens by restating the case: \"{}\"",
                        fragment
                    )),
                };
            }
        }
        Validation::passed()
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(&PatternConfig::default()).expect("built-in patterns should compile")
    }
}

fn compile(patterns: &[String], opening: bool) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            let source = if opening {
                // start of the whole text only; leading whitespace, quotes or JSON punctuation allowed
                format!(r#"\A[\s"'{{\[]*(?:{})"#, pattern)
            } else {
                pattern.clone()
            };
            RegexBuilder::new(&source)
                .case_insensitive(true)
                .build()
                .map_err(Into::into)
        })
        .collect()
}

/// Aggregated telemetry across analyses
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalSummary {
    pub total_analyses: u64,
    pub avg_uncertainty_markers: f64,
    pub total_fabrication_flags: u64,
    pub confidence_distribution: ConfidenceDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfidenceDistribution {
    pub high: u64,
    pub moderate: u64,
    pub low: u64,
}

#[derive(Debug, Default)]
struct LedgerTotals {
    analyses: u64,
    uncertainty_markers: u64,
    fabrication_flags: u64,
    distribution: ConfidenceDistribution,
}

/// Process-wide running totals of [`CognitiveSignals`]
#[derive(Debug, Default)]
pub struct SignalLedger {
    totals: Mutex<LedgerTotals>,
}

impl SignalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, signals: &CognitiveSignals) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.analyses += 1;
        totals.uncertainty_markers += signals.uncertainty_count as u64;
        totals.fabrication_flags += signals.fabrication_count as u64;
        match signals.confidence_bucket {
            ConfidenceBucket::High => totals.distribution.high += 1,
            ConfidenceBucket::Moderate => totals.distribution.moderate += 1,
            ConfidenceBucket::Low => totals.distribution.low += 1,
        }
    }

    pub fn summary(&self) -> SignalSummary {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        if totals.analyses == 0 {
            return SignalSummary::default();
        }
        SignalSummary {
            total_analyses: totals.analyses,
            avg_uncertainty_markers: totals.uncertainty_markers as f64 / totals.analyses as f64,
            total_fabrication_flags: totals.fabrication_flags,
            confidence_distribution: totals.distribution.clone(),
        }
    }
}
