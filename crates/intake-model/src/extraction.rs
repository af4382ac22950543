//! Extraction results: what the oracle read from a document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loosely keyed attribute bag for family members and history entries.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: String,
    /// Reported confidence, clamped to [0, 1].
    pub confidence: f64,
}

impl ExtractedField {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyExtraction {
    pub relationship: String,
    pub data: Attributes,
    pub confidence: f64,
}

impl FamilyExtraction {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Consensus identity: (relationship, first name, last name).
    pub fn identity(&self) -> (String, String, String) {
        (
            self.relationship.clone(),
            self.attr("first_name").unwrap_or_default().to_string(),
            self.attr("last_name").unwrap_or_default().to_string(),
        )
    }

    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = ["first_name", "middle_name", "last_name"]
            .iter()
            .filter_map(|k| self.attr(k))
            .collect();
        if parts.is_empty() {
            "(unnamed)".to_string()
        } else {
            parts.join(" ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub data: Attributes,
    #[serde(default)]
    pub is_current: bool,
    pub confidence: f64,
}

impl HistoryEntry {
    pub fn is_empty(&self) -> bool {
        self.data.values().all(|v| v.trim().is_empty())
    }
}

/// One fix reported by the self-critique pass. Kept for metrics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    #[serde(default)]
    pub old: Option<String>,
    #[serde(default)]
    pub new: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub questionnaire_type: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, ExtractedField>,
    #[serde(default)]
    pub family_members: Vec<FamilyExtraction>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<HistoryEntry>>,
    /// Free-form data the schema has no slot for.
    #[serde(default)]
    pub other: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

impl Extraction {
    /// Empty extraction for a failed or unparseable oracle call.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.family_members.is_empty() && self.history.values().all(Vec::is_empty)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|f| f.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Fields below `floor`, lowest confidence first.
    pub fn low_confidence_fields(&self, floor: f64) -> Vec<(&str, &ExtractedField)> {
        let mut low: Vec<(&str, &ExtractedField)> = self
            .fields
            .iter()
            .filter(|(_, f)| f.confidence < floor)
            .map(|(k, f)| (k.as_str(), f))
            .collect();
        low.sort_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence));
        low
    }

    /// Mean of per-field confidences, `None` when there are no fields.
    pub fn mean_field_confidence(&self) -> Option<f64> {
        if self.fields.is_empty() {
            return None;
        }
        let total: f64 = self.fields.values().map(|f| f.confidence).sum();
        Some(total / self.fields.len() as f64)
    }
}

/// Quality metrics attached to the final extraction for the reviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    pub iterations: usize,
    pub oracle_calls: usize,
    pub strategies_used: Vec<String>,
    pub blocking_initial: usize,
    pub blocking_final: usize,
    pub low_confidence_initial: usize,
    pub low_confidence_final: usize,
    pub family_verified: usize,
    pub family_dropped: usize,
    pub critique_corrections: usize,
    pub retried_fields: usize,
    pub improved_fields: usize,
}
