//! Oracle reply parsing
//!
//! A reply is free text with one embedded JSON object: everything from the
//! first `{` to the last `}`. The object is parsed into a
//! [`serde_json::Value`] and projected field by field into typed structs, so
//! a sloppy reply (bare values, numbers for strings, missing confidences)
//! degrades gracefully instead of failing the whole document.

use intake_model::{Attributes, Correction, ExtractedField, Extraction, FamilyExtraction, HistoryEntry};
use serde_json::{Map, Value};

/// Confidence assumed for a parsed reply that does not state one.
pub const DEFAULT_REPLY_CONFIDENCE: f64 = 0.8;
/// Confidence assumed for an item that does not state one.
pub const DEFAULT_ITEM_CONFIDENCE: f64 = 0.5;

const FAMILY_META_KEYS: &[&str] = &["relationship", "confidence", "verified", "reason", "index", "data"];

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("reply contains no JSON object")]
    NoObject,
    #[error("reply JSON is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("reply JSON is not an object")]
    NotAnObject,
}

/// Outermost `{ ... }` of the reply, parsed.
pub fn reply_object(text: &str) -> Result<Map<String, Value>, ReplyError> {
    let start = text.find('{').ok_or(ReplyError::NoObject)?;
    let end = text.rfind('}').ok_or(ReplyError::NoObject)?;
    if end < start {
        return Err(ReplyError::NoObject);
    }
    match serde_json::from_str::<Value>(&text[start..=end])? {
        Value::Object(map) => Ok(map),
        _ => Err(ReplyError::NotAnObject),
    }
}

// ============================================================================
// Scalar helpers
// ============================================================================

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn confidence_of(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|v| {
            if s.contains('%') {
                v / 100.0
            } else {
                v
            }
        }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(default).clamp(0.0, 1.0)
}

fn truthy(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
        _ => default,
    }
}

fn attributes(value: &Value) -> Attributes {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| scalar_text(v).map(|text| (k.clone(), text)))
            .collect(),
        _ => Attributes::new(),
    }
}

/// `data` when present, otherwise the item's own non-meta scalar keys.
fn item_attributes(item: &Map<String, Value>) -> Attributes {
    match item.get("data") {
        Some(data @ Value::Object(_)) => attributes(data),
        _ => item
            .iter()
            .filter(|(k, _)| !FAMILY_META_KEYS.contains(&k.as_str()) && k.as_str() != "is_current")
            .filter_map(|(k, v)| scalar_text(v).map(|text| (k.clone(), text)))
            .collect(),
    }
}

// ============================================================================
// Extraction projection
// ============================================================================

fn project_fields(value: Option<&Value>) -> std::collections::BTreeMap<String, ExtractedField> {
    let Some(Value::Object(map)) = value else {
        return Default::default();
    };
    map.iter()
        .filter_map(|(key, entry)| {
            let field = match entry {
                Value::Object(obj) => {
                    let value = obj.get("value").and_then(scalar_text)?;
                    ExtractedField::new(value, confidence_of(obj.get("confidence"), DEFAULT_ITEM_CONFIDENCE))
                }
                other => ExtractedField::new(scalar_text(other)?, DEFAULT_ITEM_CONFIDENCE),
            };
            Some((key.clone(), field))
        })
        .collect()
}

fn project_family(value: Option<&Value>) -> Vec<FamilyExtraction> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| FamilyExtraction {
            relationship: item
                .get("relationship")
                .and_then(scalar_text)
                .map(|r| r.to_ascii_lowercase())
                .unwrap_or_else(|| "unknown".to_string()),
            data: item_attributes(item),
            confidence: confidence_of(item.get("confidence"), DEFAULT_ITEM_CONFIDENCE),
        })
        .collect()
}

fn project_history(value: Option<&Value>) -> std::collections::BTreeMap<String, Vec<HistoryEntry>> {
    let Some(Value::Object(map)) = value else {
        return Default::default();
    };
    map.iter()
        .filter_map(|(history_type, entries)| {
            let entries: Vec<HistoryEntry> = entries
                .as_array()?
                .iter()
                .filter_map(Value::as_object)
                .map(|item| HistoryEntry {
                    data: item_attributes(item),
                    is_current: truthy(item.get("is_current"), false),
                    confidence: confidence_of(item.get("confidence"), DEFAULT_ITEM_CONFIDENCE),
                })
                .collect();
            Some((history_type.clone(), entries))
        })
        .collect()
}

fn project_corrections(value: Option<&Value>) -> Vec<Correction> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| Correction {
            field: item.get("field").and_then(scalar_text).unwrap_or_else(|| "?".to_string()),
            old: item.get("old").and_then(scalar_text),
            new: item.get("new").and_then(scalar_text),
            reason: item.get("reason").and_then(scalar_text),
        })
        .collect()
}

pub fn project_extraction(obj: &Map<String, Value>) -> Extraction {
    Extraction {
        document_type: String::new(),
        questionnaire_type: None,
        confidence: confidence_of(obj.get("confidence"), DEFAULT_REPLY_CONFIDENCE),
        fields: project_fields(obj.get("fields")),
        family_members: project_family(obj.get("family_members")),
        history: project_history(obj.get("history")),
        other: match obj.get("other") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Default::default(),
        },
        corrections: project_corrections(obj.get("corrections")),
    }
}

pub fn parse_extraction(text: &str) -> Result<Extraction, ReplyError> {
    reply_object(text).map(|obj| project_extraction(&obj))
}

/// Empty extraction at confidence 0 carrying the raw reply for the reviewer.
pub fn unparsed(text: &str) -> Extraction {
    let mut extraction = Extraction::empty();
    extraction
        .other
        .insert("raw_response".to_string(), Value::String(text.to_string()));
    extraction
}

/// Parse, or fall back to [`unparsed`] with a warning.
pub fn parse_extraction_lenient(text: &str, stage: &str) -> Extraction {
    parse_extraction(text).unwrap_or_else(|e| {
        tracing::warn!(stage, error = %e, "unparseable oracle reply");
        unparsed(text)
    })
}

// ============================================================================
// Detection and verification replies
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub document_type: String,
    pub questionnaire_name: Option<String>,
}

pub fn parse_detection(text: &str) -> Result<Detection, ReplyError> {
    let obj = reply_object(text)?;
    Ok(Detection {
        document_type: obj
            .get("document_type")
            .and_then(scalar_text)
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        questionnaire_name: obj.get("questionnaire_name").and_then(scalar_text),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMember {
    /// 1-based number echoed from the prompt, when the reply includes it.
    pub index: Option<usize>,
    pub verified: bool,
    pub data: Attributes,
    pub reason: Option<String>,
}

/// `None` when the reply has no `family_members` array at all.
pub fn parse_verification(text: &str) -> Result<Option<Vec<VerifiedMember>>, ReplyError> {
    let obj = reply_object(text)?;
    let Some(Value::Array(items)) = obj.get("family_members") else {
        return Ok(None);
    };
    Ok(Some(
        items
            .iter()
            .filter_map(Value::as_object)
            .map(|item| {
                let reason = item.get("reason").and_then(scalar_text);
                let not_found = reason
                    .as_deref()
                    .map(|r| r.eq_ignore_ascii_case("NOT_FOUND"))
                    .unwrap_or(false);
                VerifiedMember {
                    index: item.get("index").and_then(Value::as_u64).map(|i| i as usize),
                    verified: truthy(item.get("verified"), true) && !not_found,
                    data: item_attributes(item),
                    reason,
                }
            })
            .collect(),
    ))
}
