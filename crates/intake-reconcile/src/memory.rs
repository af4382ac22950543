//! In-memory Record Store for tests and offline dry runs.
//!
//! Every write is recorded so callers can inspect exactly what an apply
//! would have sent. Individual operations can be made to fail.

use crate::store::{
    Biographic, LinkMetadata, Note, Record, RecordStore, StoreError, StoreFields, FIRST_NAME_FIELD,
    IDENTIFIER_FIELD, LAST_NAME_FIELD,
};
use async_trait::async_trait;
use intake_model::normalize::digits_only;
use intake_model::StructuredKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetRecord,
    SearchRecords,
    SearchByIdentifier,
    GetBiographic,
    CreateRecord,
    UpdateRecord,
    CreateBiographic,
    UpdateBiographic,
    LinkRelative,
    CreateHistoryRecord,
    CreateNote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLink {
    pub primary_id: String,
    pub related_id: String,
    pub relationship: String,
    pub metadata: LinkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHistory {
    pub id: String,
    pub record_id: String,
    pub kind: StructuredKind,
    pub fields: StoreFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNote {
    pub id: String,
    pub record_id: String,
    pub note: Note,
}

/// Store contents; also the on-disk fixture format for `--offline` runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub biographics: Vec<Biographic>,
    #[serde(default)]
    pub links: Vec<StoredLink>,
    #[serde(default)]
    pub history: Vec<StoredHistory>,
    #[serde(default)]
    pub notes: Vec<StoredNote>,
    #[serde(default)]
    next_id: u64,
}

impl StoreState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
    structured: BTreeSet<StructuredKind>,
    failures: Mutex<HashSet<Operation>>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    /// Empty store supporting every structured history kind.
    pub fn new() -> Self {
        Self::from_state(StoreState::default())
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            structured: [
                StructuredKind::Address,
                StructuredKind::Employment,
                StructuredKind::Education,
                StructuredKind::Travel,
            ]
            .into_iter()
            .collect(),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Load a JSON fixture of records and biographics.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::NotConfigured(format!("cannot read {}: {e}", path.display())))?;
        let state: StoreState = serde_json::from_str(&text)
            .map_err(|e| StoreError::InvalidResponse(format!("{}: {e}", path.display())))?;
        Ok(Self::from_state(state))
    }

    pub fn with_structured(mut self, kinds: &[StructuredKind]) -> Self {
        self.structured = kinds.iter().copied().collect();
        self
    }

    pub fn insert_record(&self, record: Record) {
        self.state.lock().records.push(record);
    }

    pub fn insert_biographic(&self, biographic: Biographic) {
        self.state.lock().biographics.push(biographic);
    }

    /// Make every later call of `operation` fail with a network error.
    pub fn fail_on(&self, operation: Operation) {
        self.failures.lock().insert(operation);
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }

    pub fn record(&self, id: &str) -> Option<Record> {
        self.state.lock().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn biographic_for(&self, record_id: &str) -> Option<Biographic> {
        self.state
            .lock()
            .biographics
            .iter()
            .find(|b| b.record_id == record_id)
            .cloned()
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        if self.failures.lock().contains(&operation) {
            return Err(StoreError::Network(format!("injected failure: {operation:?}")));
        }
        Ok(())
    }
}

fn display_name(first: &str, last: &str) -> String {
    format!("{last}, {first}")
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        self.check(Operation::GetRecord)?;
        Ok(self.record(id))
    }

    async fn search_records(&self, first_name: &str, last_name: &str) -> Result<Vec<Record>, StoreError> {
        self.check(Operation::SearchRecords)?;
        let matches = |record: &Record, field: &str, wanted: &str| {
            record
                .field(field)
                .map(|v| v.eq_ignore_ascii_case(wanted.trim()))
                .unwrap_or(false)
        };
        Ok(self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| matches(r, FIRST_NAME_FIELD, first_name) && matches(r, LAST_NAME_FIELD, last_name))
            .cloned()
            .collect())
    }

    async fn search_by_identifier(&self, identifier: &str) -> Result<Option<Record>, StoreError> {
        self.check(Operation::SearchByIdentifier)?;
        let wanted = digits_only(identifier);
        if wanted.is_empty() {
            return Ok(None);
        }
        let state = self.state.lock();
        let holder = state
            .biographics
            .iter()
            .find(|b| b.field(IDENTIFIER_FIELD).map(digits_only).as_deref() == Some(wanted.as_str()))
            .map(|b| b.record_id.clone());
        Ok(holder.and_then(|id| state.records.iter().find(|r| r.id == id).cloned()))
    }

    async fn get_biographic(&self, record_id: &str) -> Result<Option<Biographic>, StoreError> {
        self.check(Operation::GetBiographic)?;
        Ok(self.biographic_for(record_id))
    }

    async fn create_record(&self, first_name: &str, last_name: &str, fields: &StoreFields) -> Result<String, StoreError> {
        self.check(Operation::CreateRecord)?;
        let mut state = self.state.lock();
        let id = state.allocate("rec");
        let mut all = fields.clone();
        all.insert(FIRST_NAME_FIELD.to_string(), first_name.to_string());
        all.insert(LAST_NAME_FIELD.to_string(), last_name.to_string());
        state.records.push(Record {
            id: id.clone(),
            display_name: display_name(first_name, last_name),
            fields: all,
        });
        Ok(id)
    }

    async fn update_record(&self, id: &str, fields: &StoreFields) -> Result<(), StoreError> {
        self.check(Operation::UpdateRecord)?;
        let mut state = self.state.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))?;
        record.fields.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        let first = record.field(FIRST_NAME_FIELD).unwrap_or_default().to_string();
        let last = record.field(LAST_NAME_FIELD).unwrap_or_default().to_string();
        record.display_name = display_name(&first, &last);
        Ok(())
    }

    async fn create_biographic(&self, record_id: &str, fields: &StoreFields) -> Result<String, StoreError> {
        self.check(Operation::CreateBiographic)?;
        let mut state = self.state.lock();
        if !state.records.iter().any(|r| r.id == record_id) {
            return Err(StoreError::NotFound(format!("record {record_id}")));
        }
        let id = state.allocate("bio");
        state.biographics.push(Biographic {
            id: id.clone(),
            record_id: record_id.to_string(),
            fields: fields.clone(),
        });
        Ok(id)
    }

    async fn update_biographic(&self, biographic_id: &str, fields: &StoreFields) -> Result<(), StoreError> {
        self.check(Operation::UpdateBiographic)?;
        let mut state = self.state.lock();
        let bio = state
            .biographics
            .iter_mut()
            .find(|b| b.id == biographic_id)
            .ok_or_else(|| StoreError::NotFound(format!("biographic {biographic_id}")))?;
        bio.fields.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn link_relative(
        &self,
        primary_id: &str,
        related_id: &str,
        relationship: &str,
        metadata: &LinkMetadata,
    ) -> Result<(), StoreError> {
        self.check(Operation::LinkRelative)?;
        let mut state = self.state.lock();
        for id in [primary_id, related_id] {
            if !state.records.iter().any(|r| r.id == id) {
                return Err(StoreError::NotFound(format!("record {id}")));
            }
        }
        state.links.push(StoredLink {
            primary_id: primary_id.to_string(),
            related_id: related_id.to_string(),
            relationship: relationship.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    async fn create_history_record(
        &self,
        record_id: &str,
        kind: StructuredKind,
        fields: &StoreFields,
    ) -> Result<String, StoreError> {
        self.check(Operation::CreateHistoryRecord)?;
        if !self.supports_structured(kind) {
            return Err(StoreError::Unsupported(format!("{} records", kind.as_str())));
        }
        let mut state = self.state.lock();
        let id = state.allocate("hist");
        state.history.push(StoredHistory {
            id: id.clone(),
            record_id: record_id.to_string(),
            kind,
            fields: fields.clone(),
        });
        Ok(id)
    }

    async fn create_note(&self, record_id: &str, note: &Note) -> Result<String, StoreError> {
        self.check(Operation::CreateNote)?;
        let mut state = self.state.lock();
        let id = state.allocate("note");
        state.notes.push(StoredNote {
            id: id.clone(),
            record_id: record_id.to_string(),
            note: note.clone(),
        });
        Ok(id)
    }

    fn supports_structured(&self, kind: StructuredKind) -> bool {
        self.structured.contains(&kind)
    }
}
