//! Change Set: the reviewable proposal for one document pass.
//!
//! ```text
//! DiffEngine ──builds──► ChangeSet ──snapshot──► review ──► ApplyEngine
//!                          │
//!                          ├── FieldChange*          (approval / override)
//!                          ├── FamilyMemberCandidate* (action / match / edits)
//!                          ├── HistorySet per type    (disposition / records)
//!                          └── other, errors, validation, metrics
//! ```
//!
//! Construction goes through [`ChangeSetBuilder`]. After `build()` the field
//! change list can no longer grow; only the review fields (approval,
//! override, family action, history disposition and records) change, plus
//! the identifiers the apply engine writes back.

use crate::error::ModelError;
use crate::extraction::{Attributes, ExtractionMetrics};
use crate::normalize::normalize;
use crate::schema::{FieldDefinition, ValueType, NAME_KEYS};
use crate::validation::ValidationIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const CHANGE_SET_VERSION: u32 = 1;

// ============================================================================
// Field changes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    New,
    Modified,
    Unchanged,
    Removed,
}

impl Classification {
    pub fn has_change(&self) -> bool {
        matches!(self, Classification::New | Classification::Modified)
    }

    /// Absent (or blank) current ⇒ NEW; otherwise compare normalized values.
    pub fn classify(current: Option<&str>, proposed: &str, value_type: ValueType) -> Self {
        match current.map(str::trim).filter(|c| !c.is_empty()) {
            None => Classification::New,
            Some(current) if normalize(current, value_type) != normalize(proposed, value_type) => {
                Classification::Modified
            }
            Some(_) => Classification::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    field_key: String,
    label: String,
    external_field: Option<String>,
    biographic: bool,
    current_value: Option<String>,
    proposed_value: String,
    confidence: f64,
    classification: Classification,
    approved: bool,
    #[serde(default)]
    override_value: Option<String>,
}

impl FieldChange {
    /// Approval defaults to `has_change`.
    pub fn new(
        definition: &FieldDefinition,
        current_value: Option<String>,
        proposed_value: String,
        confidence: f64,
        classification: Classification,
    ) -> Self {
        Self {
            field_key: definition.key.clone(),
            label: definition.label.clone(),
            external_field: definition.external_field.clone(),
            biographic: definition.biographic,
            current_value,
            proposed_value,
            confidence,
            classification,
            approved: classification.has_change(),
            override_value: None,
        }
    }

    /// Classify `proposed` against `current` using the definition's value type.
    pub fn diff(definition: &FieldDefinition, current: Option<String>, proposed: String, confidence: f64) -> Self {
        let classification = Classification::classify(current.as_deref(), &proposed, definition.value_type);
        Self::new(definition, current, proposed, confidence, classification)
    }

    pub fn field_key(&self) -> &str {
        &self.field_key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn external_field(&self) -> Option<&str> {
        self.external_field.as_deref()
    }

    pub fn is_biographic(&self) -> bool {
        self.biographic
    }

    pub fn current_value(&self) -> Option<&str> {
        self.current_value.as_deref()
    }

    pub fn proposed_value(&self) -> &str {
        &self.proposed_value
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn override_value(&self) -> Option<&str> {
        self.override_value.as_deref()
    }

    pub fn has_change(&self) -> bool {
        self.classification.has_change()
    }

    /// The value that would be written: override if set, else the proposal.
    pub fn final_value(&self) -> &str {
        self.override_value.as_deref().unwrap_or(&self.proposed_value)
    }

    /// Approved and carrying an actual change.
    pub fn is_applicable(&self) -> bool {
        self.approved && self.has_change()
    }

    pub(crate) fn set_approved(&mut self, approved: bool) {
        self.approved = approved;
    }

    pub(crate) fn set_override(&mut self, value: Option<String>) {
        self.override_value = value;
    }
}

// ============================================================================
// Record matching
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Exact unique-identifier match via live search.
    Identifier,
    /// Identifier resolved through the read-only identifier cache.
    IdentifierCache,
    NameAndBirthDate,
    NameOnly,
    /// Chosen by the reviewer.
    ManualSearch,
}

impl MatchMethod {
    pub fn label(&self) -> &'static str {
        match self {
            MatchMethod::Identifier => "identifier",
            MatchMethod::IdentifierCache => "identifier (cache)",
            MatchMethod::NameAndBirthDate => "name + birth date",
            MatchMethod::NameOnly => "name only",
            MatchMethod::ManualSearch => "manual search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMatch {
    pub record_id: String,
    pub display_name: String,
    pub method: MatchMethod,
    pub confidence: f64,
}

// ============================================================================
// Family members
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FamilyAction {
    Skip,
    LinkExisting,
    CreateNew,
    UpdateLinked,
}

impl FamilyAction {
    /// `UPDATE_LINKED` when the best match clears `threshold`, else `SKIP`
    /// pending human confirmation.
    pub fn default_for(best_confidence: Option<f64>, threshold: f64) -> Self {
        match best_confidence {
            Some(c) if c >= threshold => FamilyAction::UpdateLinked,
            _ => FamilyAction::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMemberCandidate {
    relationship: String,
    attributes: Attributes,
    confidence: f64,
    matches: Vec<RecordMatch>,
    selected_match: Option<usize>,
    action: FamilyAction,
    #[serde(default)]
    field_changes: Vec<FieldChange>,
    #[serde(default)]
    edits: Attributes,
    #[serde(default)]
    created_record_id: Option<String>,
}

impl FamilyMemberCandidate {
    /// Selects the highest-confidence match (first on ties) and derives the
    /// default action from it.
    pub fn new(
        relationship: impl Into<String>,
        attributes: Attributes,
        confidence: f64,
        matches: Vec<RecordMatch>,
        field_changes: Vec<FieldChange>,
        match_threshold: f64,
    ) -> Self {
        let mut selected_match: Option<usize> = None;
        for (idx, m) in matches.iter().enumerate() {
            match selected_match {
                Some(best) if matches[best].confidence >= m.confidence => {}
                _ => selected_match = Some(idx),
            }
        }
        let best = selected_match.map(|idx| matches[idx].confidence);
        Self {
            relationship: relationship.into(),
            attributes,
            confidence,
            matches,
            selected_match,
            action: FamilyAction::default_for(best, match_threshold),
            field_changes,
            edits: Attributes::new(),
            created_record_id: None,
        }
    }

    pub fn relationship(&self) -> &str {
        &self.relationship
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn matches(&self) -> &[RecordMatch] {
        &self.matches
    }

    pub fn selected_match(&self) -> Option<&RecordMatch> {
        self.selected_match.and_then(|idx| self.matches.get(idx))
    }

    pub fn action(&self) -> FamilyAction {
        self.action
    }

    pub fn field_changes(&self) -> &[FieldChange] {
        &self.field_changes
    }

    pub fn edits(&self) -> &Attributes {
        &self.edits
    }

    pub fn created_record_id(&self) -> Option<&str> {
        self.created_record_id.as_deref()
    }

    /// Raw attributes overlaid with human edits.
    pub fn final_attributes(&self) -> Attributes {
        let mut merged = self.attributes.clone();
        for (k, v) in &self.edits {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    pub fn final_attr(&self, key: &str) -> Option<String> {
        self.edits
            .get(key)
            .or_else(|| self.attributes.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn display_name(&self) -> String {
        let parts: Vec<String> = NAME_KEYS
            .iter()
            .filter_map(|k| self.final_attr(k))
            .collect();
        if parts.is_empty() {
            "(unnamed)".to_string()
        } else {
            parts.join(" ")
        }
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryDisposition {
    SaveAsStructuredRecords,
    SaveAsNote,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_type: String,
    pub data: Attributes,
    pub confidence: f64,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub edits: Attributes,
    /// Store id once saved as a structured record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_id: Option<String>,
}

impl HistoryRecord {
    pub fn new(history_type: impl Into<String>, data: Attributes, confidence: f64, is_current: bool) -> Self {
        Self {
            history_type: history_type.into(),
            data,
            confidence,
            is_current,
            edits: Attributes::new(),
            saved_id: None,
        }
    }

    /// Raw data overlaid with human edits.
    pub fn final_data(&self) -> Attributes {
        let mut merged = self.data.clone();
        for (k, v) in &self.edits {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySet {
    pub history_type: String,
    pub records: Vec<HistoryRecord>,
    pub disposition: HistoryDisposition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
}

impl HistorySet {
    /// Structured records only when the store natively supports the type.
    pub fn new(history_type: impl Into<String>, records: Vec<HistoryRecord>, structured_supported: bool) -> Self {
        Self {
            history_type: history_type.into(),
            records,
            disposition: if structured_supported {
                HistoryDisposition::SaveAsStructuredRecords
            } else {
                HistoryDisposition::SaveAsNote
            },
            note_id: None,
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProvenance {
    pub source: String,
    pub document_type: String,
    #[serde(default)]
    pub questionnaire_type: Option<String>,
    pub page_count: usize,
    /// Hex SHA-256 of the source file, when it was read from disk.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub record_id: Option<String>,
    pub display_name: String,
    pub identifier: Option<String>,
    pub match_method: Option<MatchMethod>,
    pub match_confidence: Option<f64>,
    pub biographic_id: Option<String>,
    /// Other candidates seen by an ambiguous name-only search.
    #[serde(default)]
    pub alternatives: Vec<RecordMatch>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    #[default]
    Pending,
    Proceed,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    id: Uuid,
    version: u32,
    created_at: DateTime<Utc>,
    provenance: DocumentProvenance,
    record: RecordIdentity,
    extraction_confidence: f64,
    changes: Vec<FieldChange>,
    family_members: Vec<FamilyMemberCandidate>,
    history: BTreeMap<String, HistorySet>,
    other: BTreeMap<String, serde_json::Value>,
    errors: Vec<String>,
    #[serde(default)]
    validation: Vec<ValidationIssue>,
    #[serde(default)]
    metrics: Option<ExtractionMetrics>,
    #[serde(default)]
    review: ReviewDecision,
}

impl ChangeSet {
    pub fn builder(provenance: DocumentProvenance) -> ChangeSetBuilder {
        ChangeSetBuilder {
            inner: ChangeSet {
                id: Uuid::new_v4(),
                version: CHANGE_SET_VERSION,
                created_at: Utc::now(),
                provenance,
                record: RecordIdentity::default(),
                extraction_confidence: 0.0,
                changes: Vec::new(),
                family_members: Vec::new(),
                history: BTreeMap::new(),
                other: BTreeMap::new(),
                errors: Vec::new(),
                validation: Vec::new(),
                metrics: None,
                review: ReviewDecision::Pending,
            },
        }
    }

    // ---- read access -------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn provenance(&self) -> &DocumentProvenance {
        &self.provenance
    }

    pub fn record(&self) -> &RecordIdentity {
        &self.record
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record.record_id.as_deref()
    }

    pub fn extraction_confidence(&self) -> f64 {
        self.extraction_confidence
    }

    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    pub fn change(&self, key: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field_key == key)
    }

    pub fn family_members(&self) -> &[FamilyMemberCandidate] {
        &self.family_members
    }

    pub fn history(&self) -> &BTreeMap<String, HistorySet> {
        &self.history
    }

    pub fn other(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.other
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn validation(&self) -> &[ValidationIssue] {
        &self.validation
    }

    pub fn metrics(&self) -> Option<&ExtractionMetrics> {
        self.metrics.as_ref()
    }

    pub fn review(&self) -> ReviewDecision {
        self.review
    }

    /// Approved changes that carry an actual change.
    pub fn approved_changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| c.is_applicable())
    }

    /// Count of NEW/MODIFIED field changes.
    pub fn total_changes(&self) -> usize {
        self.changes.iter().filter(|c| c.has_change()).count()
    }

    // ---- review surface ----------------------------------------------------

    fn change_mut(&mut self, key: &str) -> Result<&mut FieldChange, ModelError> {
        self.changes
            .iter_mut()
            .find(|c| c.field_key == key)
            .ok_or_else(|| ModelError::UnknownField(key.to_string()))
    }

    fn family_mut(&mut self, index: usize) -> Result<&mut FamilyMemberCandidate, ModelError> {
        self.family_members.get_mut(index).ok_or(ModelError::NoSuchEntry {
            kind: "family member",
            index,
        })
    }

    fn history_mut(&mut self, history_type: &str) -> Result<&mut HistorySet, ModelError> {
        self.history
            .get_mut(history_type)
            .ok_or_else(|| ModelError::UnknownHistoryType(history_type.to_string()))
    }

    pub fn approve(&mut self, key: &str, approved: bool) -> Result<(), ModelError> {
        self.change_mut(key)?.set_approved(approved);
        Ok(())
    }

    pub fn set_override(&mut self, key: &str, value: Option<String>) -> Result<(), ModelError> {
        self.change_mut(key)?.set_override(value);
        Ok(())
    }

    pub fn set_family_action(&mut self, index: usize, action: FamilyAction) -> Result<(), ModelError> {
        self.family_mut(index)?.action = action;
        Ok(())
    }

    pub fn select_family_match(&mut self, index: usize, match_index: usize) -> Result<(), ModelError> {
        let fm = self.family_mut(index)?;
        if match_index >= fm.matches.len() {
            return Err(ModelError::NoSuchEntry {
                kind: "record match",
                index: match_index,
            });
        }
        fm.selected_match = Some(match_index);
        Ok(())
    }

    /// Record a reviewer-found match and select it.
    pub fn add_manual_match(
        &mut self,
        index: usize,
        record_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<(), ModelError> {
        let fm = self.family_mut(index)?;
        fm.matches.push(RecordMatch {
            record_id: record_id.into(),
            display_name: display_name.into(),
            method: MatchMethod::ManualSearch,
            confidence: 1.0,
        });
        fm.selected_match = Some(fm.matches.len() - 1);
        Ok(())
    }

    pub fn edit_family_attribute(
        &mut self,
        index: usize,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ModelError> {
        self.family_mut(index)?.edits.insert(key.into(), value.into());
        Ok(())
    }

    pub fn approve_family_field(&mut self, index: usize, key: &str, approved: bool) -> Result<(), ModelError> {
        let fm = self.family_mut(index)?;
        let change = fm
            .field_changes
            .iter_mut()
            .find(|c| c.field_key == key)
            .ok_or_else(|| ModelError::UnknownField(key.to_string()))?;
        change.set_approved(approved);
        Ok(())
    }

    pub fn set_history_disposition(
        &mut self,
        history_type: &str,
        disposition: HistoryDisposition,
    ) -> Result<(), ModelError> {
        self.history_mut(history_type)?.disposition = disposition;
        Ok(())
    }

    /// Append a record; a type with no set yet gets one saved as a note.
    pub fn add_history_record(&mut self, record: HistoryRecord) {
        let key = record.history_type.clone();
        self.history
            .entry(key.clone())
            .or_insert_with(|| HistorySet::new(key, Vec::new(), false))
            .records
            .push(record);
    }

    pub fn edit_history_record(
        &mut self,
        history_type: &str,
        index: usize,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ModelError> {
        let record = self
            .history_mut(history_type)?
            .records
            .get_mut(index)
            .ok_or(ModelError::NoSuchEntry {
                kind: "history record",
                index,
            })?;
        record.edits.insert(key.into(), value.into());
        Ok(())
    }

    pub fn remove_history_record(&mut self, history_type: &str, index: usize) -> Result<HistoryRecord, ModelError> {
        let set = self.history_mut(history_type)?;
        if index >= set.records.len() {
            return Err(ModelError::NoSuchEntry {
                kind: "history record",
                index,
            });
        }
        Ok(set.records.remove(index))
    }

    pub fn set_review(&mut self, decision: ReviewDecision) {
        self.review = decision;
    }

    // ---- pipeline annotations ----------------------------------------------

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn attach_validation(&mut self, issues: Vec<ValidationIssue>) {
        self.validation = issues;
    }

    pub fn attach_metrics(&mut self, metrics: ExtractionMetrics) {
        self.metrics = Some(metrics);
    }

    // ---- apply write-back --------------------------------------------------

    /// Back-fill the id of a record created during apply. Only allowed while
    /// no identity has been set.
    pub fn assign_created_record(&mut self, record_id: impl Into<String>) -> Result<(), ModelError> {
        if let Some(existing) = &self.record.record_id {
            return Err(ModelError::IdentityAlreadySet {
                existing: existing.clone(),
            });
        }
        self.record.record_id = Some(record_id.into());
        Ok(())
    }

    pub fn assign_biographic_id(&mut self, biographic_id: impl Into<String>) {
        self.record.biographic_id = Some(biographic_id.into());
    }

    pub fn assign_family_record(&mut self, index: usize, record_id: impl Into<String>) -> Result<(), ModelError> {
        self.family_mut(index)?.created_record_id = Some(record_id.into());
        Ok(())
    }

    pub fn assign_history_record(
        &mut self,
        history_type: &str,
        index: usize,
        saved_id: impl Into<String>,
    ) -> Result<(), ModelError> {
        let record = self
            .history_mut(history_type)?
            .records
            .get_mut(index)
            .ok_or(ModelError::NoSuchEntry {
                kind: "history record",
                index,
            })?;
        record.saved_id = Some(saved_id.into());
        Ok(())
    }

    pub fn assign_history_note(&mut self, history_type: &str, note_id: impl Into<String>) -> Result<(), ModelError> {
        self.history_mut(history_type)?.note_id = Some(note_id.into());
        Ok(())
    }
}

/// Append-only construction of a [`ChangeSet`].
#[derive(Debug)]
pub struct ChangeSetBuilder {
    inner: ChangeSet,
}

impl ChangeSetBuilder {
    pub fn identity(mut self, record: RecordIdentity) -> Self {
        self.inner.record = record;
        self
    }

    pub fn extraction_confidence(mut self, confidence: f64) -> Self {
        self.inner.extraction_confidence = confidence;
        self
    }

    pub fn push_change(&mut self, change: FieldChange) -> &mut Self {
        self.inner.changes.push(change);
        self
    }

    pub fn push_family(&mut self, candidate: FamilyMemberCandidate) -> &mut Self {
        self.inner.family_members.push(candidate);
        self
    }

    pub fn insert_history(&mut self, set: HistorySet) -> &mut Self {
        self.inner.history.insert(set.history_type.clone(), set);
        self
    }

    pub fn insert_other(&mut self, key: impl Into<String>, value: serde_json::Value) -> &mut Self {
        self.inner.other.entry(key.into()).or_insert(value);
        self
    }

    pub fn push_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.inner.errors.push(message.into());
        self
    }

    pub fn build(self) -> ChangeSet {
        self.inner
    }
}
