//! Response normalization: untrusted model text into a canonical [`AnalysisResult`]
//!
//! Decoding happens in two steps. The raw text is decoded as a JSON object,
//! then every declared field of the active mode is classified into a
//! [`RawField`] shape and coerced through one table into a list of [`Item`]s.
//! Severity is derived afterwards from the normalized lists only.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::context::AnalysisMode;
use crate::result::{AnalysisResult, Item, LlmStatus, Severity};
use crate::utils::{non_blank, truncate_chars};

/// Cap on the raw-text excerpt echoed back when decoding fails
pub const PARSE_ERROR_EXCERPT_CHARS: usize = 300;

/// Keys that name an entry, in priority order
const LABEL_KEYS: &[&str] = &[
    "label",
    "condition",
    "scenario",
    "study",
    "finding",
    "name",
    "title",
];

/// Keys that explain an entry, in priority order
const RATIONALE_KEYS: &[&str] = &["rationale", "why", "reason", "target", "detail"];

/// Keys that carry a suggested next step
const ACTION_KEYS: &[&str] = &["action", "next_step"];

/// A declared list field and where to look for it in the decoded payload
#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Candidate paths, first non-null wins
    pub sources: &'static [&'static [&'static str]],
}

/// Declared fields and severity rule for one analysis mode
#[derive(Debug)]
pub struct ModeSchema {
    pub mode: AnalysisMode,
    pub fields: &'static [FieldSpec],
    /// Any item in these lists => red
    pub red_fields: &'static [&'static str],
    /// Otherwise any item in these lists => yellow
    pub yellow_fields: &'static [&'static str],
}

static CLINICAL_SCHEMA: ModeSchema = ModeSchema {
    mode: AnalysisMode::Clinical,
    fields: &[
        FieldSpec {
            name: "critical",
            sources: &[&["scenarios", "critical"], &["critical"]],
        },
        FieldSpec {
            name: "intermediate",
            sources: &[&["scenarios", "intermediate"], &["intermediate"]],
        },
        FieldSpec {
            name: "manageable",
            sources: &[&["scenarios", "manageable"], &["manageable"]],
        },
        FieldSpec {
            name: "alert_findings",
            sources: &[&["alert_findings"]],
        },
        FieldSpec {
            name: "workup",
            sources: &[&["workup"]],
        },
        FieldSpec {
            name: "clinical_keys",
            sources: &[&["clinical_keys"]],
        },
        FieldSpec {
            name: "references",
            sources: &[&["references"]],
        },
        FieldSpec {
            name: "data_gaps",
            sources: &[&["data_gaps"]],
        },
    ],
    red_fields: &["critical"],
    yellow_fields: &["intermediate"],
};

static PIVOT_SCHEMA: ModeSchema = ModeSchema {
    mode: AnalysisMode::Pivot,
    fields: &[
        FieldSpec {
            name: "high_impact",
            sources: &[&["high_impact"]],
        },
        FieldSpec {
            name: "alternatives",
            sources: &[&["alternatives"]],
        },
        FieldSpec {
            name: "pivot_triggers",
            sources: &[&["pivot_triggers"]],
        },
        FieldSpec {
            name: "blind_spots",
            sources: &[&["blind_spots"]],
        },
        FieldSpec {
            name: "data_gaps",
            sources: &[&["data_gaps"]],
        },
    ],
    red_fields: &["high_impact"],
    yellow_fields: &["alternatives"],
};

pub fn schema_for(mode: AnalysisMode) -> &'static ModeSchema {
    match mode {
        AnalysisMode::Clinical => &CLINICAL_SCHEMA,
        AnalysisMode::Pivot => &PIVOT_SCHEMA,
    }
}

impl ModeSchema {
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    pub fn empty_lists(&self) -> BTreeMap<String, Vec<Item>> {
        self.field_names()
            .map(|name| (name.to_string(), Vec::new()))
            .collect()
    }

    /// Severity from already-normalized lists
    pub fn severity(&self, lists: &BTreeMap<String, Vec<Item>>) -> Severity {
        let any = |names: &[&str]| {
            names
                .iter()
                .any(|name| lists.get(*name).is_some_and(|items| !items.is_empty()))
        };
        if any(self.red_fields) {
            Severity::Red
        } else if any(self.yellow_fields) {
            Severity::Yellow
        } else {
            Severity::Green
        }
    }
}

impl FieldSpec {
    fn lookup<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        self.sources
            .iter()
            .filter_map(|path| resolve(root, path))
            .find(|value| !value.is_null())
    }
}

fn resolve<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = root.get(*first)?;
    for key in rest {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

/// Shape of a raw field before coercion
#[derive(Debug)]
enum RawField<'a> {
    Absent,
    Null,
    Text(&'a str),
    List(&'a [Value]),
    Record(&'a Map<String, Value>),
    Scalar(&'a Value),
}

impl<'a> RawField<'a> {
    fn classify(value: Option<&'a Value>) -> Self {
        match value {
            None => RawField::Absent,
            Some(Value::Null) => RawField::Null,
            Some(Value::String(s)) => RawField::Text(s),
            Some(Value::Array(entries)) => RawField::List(entries),
            Some(Value::Object(map)) => RawField::Record(map),
            Some(other) => RawField::Scalar(other),
        }
    }

    /// The coercion table. Every input shape lands on a list.
    ///
    /// | input            | output                                   |
    /// |------------------|------------------------------------------|
    /// | absent / null    | `[]`                                     |
    /// | string           | `[item]`, or `[]` when blank             |
    /// | list             | entries coerced, nulls and blanks dropped |
    /// | object           | `[item]`                                 |
    /// | number / bool    | `[item(string form)]`                    |
    fn into_items(self) -> Vec<Item> {
        match self {
            RawField::Absent | RawField::Null => Vec::new(),
            RawField::Text(s) => non_blank(s).map(Item::labeled).into_iter().collect(),
            RawField::List(entries) => entries.iter().filter_map(coerce_entry).collect(),
            RawField::Record(map) => item_from_record(map).into_iter().collect(),
            RawField::Scalar(value) => vec![Item::labeled(value.to_string())],
        }
    }
}

/// Coerce any JSON value into the canonical list shape
pub fn coerce_list(value: Option<&Value>) -> Vec<Item> {
    RawField::classify(value).into_items()
}

fn coerce_entry(entry: &Value) -> Option<Item> {
    match entry {
        Value::Null => None,
        Value::String(s) => non_blank(s).map(Item::labeled),
        Value::Object(map) => item_from_record(map),
        other => Some(Item::labeled(other.to_string())),
    }
}

fn item_from_record(map: &Map<String, Value>) -> Option<Item> {
    if map.is_empty() {
        return None;
    }
    let label = first_text(map, LABEL_KEYS).unwrap_or_else(|| Value::Object(map.clone()).to_string());
    Some(Item {
        label,
        rationale: first_text(map, RATIONALE_KEYS),
        action: first_text(map, ACTION_KEYS),
    })
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) => non_blank(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse raw model text for `mode`.
///
/// Never fails: undecodable text yields an empty result with severity yellow
/// and a bounded excerpt in `parse_error`.
pub fn parse(mode: AnalysisMode, raw_text: &str) -> AnalysisResult {
    match decode(raw_text) {
        Ok(root) => normalize(mode, &root),
        Err(reason) => {
            tracing::debug!("model output not decodable ({}): {}", mode, reason);
            unparseable(mode, raw_text)
        }
    }
}

/// Normalize an already-decoded payload
pub fn normalize(mode: AnalysisMode, root: &Map<String, Value>) -> AnalysisResult {
    let schema = schema_for(mode);
    let mut result = AnalysisResult::empty(mode, Severity::Green, LlmStatus::Ok);
    for spec in schema.fields {
        result
            .lists
            .insert(spec.name.to_string(), coerce_list(spec.lookup(root)));
    }
    result.severity = schema.severity(&result.lists);
    result
}

fn unparseable(mode: AnalysisMode, raw_text: &str) -> AnalysisResult {
    let mut result = AnalysisResult::empty(mode, Severity::Yellow, LlmStatus::Ok);
    let excerpt = truncate_chars(raw_text.trim(), PARSE_ERROR_EXCERPT_CHARS);
    result.parse_error = Some(if excerpt.is_empty() {
        "empty response".to_string()
    } else {
        excerpt.to_string()
    });
    result
}

fn decode(raw_text: &str) -> Result<Map<String, Value>, String> {
    let body = strip_code_fence(raw_text.trim());
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", kind_of(&other))),
        Err(err) => Err(err.to_string()),
    }
}

/// Models sometimes wrap JSON in a markdown fence despite `format: json`
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
