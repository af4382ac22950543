//! Apply Engine
//!
//! Writes the approved subset of a reviewed [`ChangeSet`] in three phases:
//!
//! ```text
//! 1. primary  ── create (needs first + last name) or update + biographic
//! 2. family   ── CREATE_NEW / LINK_EXISTING / UPDATE_LINKED / SKIP per candidate
//! 3. history  ── structured records (best effort) or one ordered note per type
//! ```
//!
//! A failure is recorded against its (phase, entity) and the engine moves on;
//! one entity never aborts another. Best-effort sub-steps (a family member's
//! biographic, a single structured history row) are reported as warnings and
//! do not affect [`ApplyReport::success`].
//!
//! Created family records, saved history rows and history notes keep their
//! store ids in the change set, so applying the same snapshot twice does not
//! write them again.

use crate::notes::history_note;
use crate::store::{LinkMetadata, RecordStore, StoreFields, FIRST_NAME_FIELD, LAST_NAME_FIELD};
use intake_model::schema::{FIRST_NAME, LAST_NAME, NAME_KEYS};
use intake_model::{
    ChangeSet, FamilyAction, FamilyMemberCandidate, FieldChange, HistoryDisposition, HistorySet,
    ReviewDecision, SchemaRegistry,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Primary,
    Family,
    History,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Primary => "primary",
            Phase::Family => "family",
            Phase::History => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedItem {
    pub phase: Phase,
    pub entity: String,
    pub id: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyIssue {
    pub phase: Phase,
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub created: Vec<AppliedItem>,
    pub updated: Vec<AppliedItem>,
    pub skipped: Vec<AppliedItem>,
    pub errors: Vec<ApplyIssue>,
    pub warnings: Vec<ApplyIssue>,
}

impl ApplyReport {
    /// No unrecovered failures. Warnings do not count.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn phase_errors(&self, phase: Phase) -> impl Iterator<Item = &ApplyIssue> {
        self.errors.iter().filter(move |e| e.phase == phase)
    }

    fn created(&mut self, phase: Phase, entity: impl Into<String>, id: impl Into<String>, detail: impl Into<String>) {
        self.created.push(AppliedItem {
            phase,
            entity: entity.into(),
            id: Some(id.into()),
            detail: detail.into(),
        });
    }

    fn updated(&mut self, phase: Phase, entity: impl Into<String>, id: impl Into<String>, detail: impl Into<String>) {
        self.updated.push(AppliedItem {
            phase,
            entity: entity.into(),
            id: Some(id.into()),
            detail: detail.into(),
        });
    }

    fn skipped(&mut self, phase: Phase, entity: impl Into<String>, detail: impl Into<String>) {
        self.skipped.push(AppliedItem {
            phase,
            entity: entity.into(),
            id: None,
            detail: detail.into(),
        });
    }

    fn error(&mut self, phase: Phase, entity: impl Into<String>, message: impl Into<String>) {
        let issue = ApplyIssue {
            phase,
            entity: entity.into(),
            message: message.into(),
        };
        tracing::warn!(phase = phase.as_str(), entity = %issue.entity, message = %issue.message, "apply failed");
        self.errors.push(issue);
    }

    fn warning(&mut self, phase: Phase, entity: impl Into<String>, message: impl Into<String>) {
        let issue = ApplyIssue {
            phase,
            entity: entity.into(),
            message: message.into(),
        };
        tracing::warn!(phase = phase.as_str(), entity = %issue.entity, message = %issue.message, "apply warning");
        self.warnings.push(issue);
    }
}

/// Applicable changes split into primary-record and biographic field maps.
fn split_fields<'a>(changes: impl Iterator<Item = &'a FieldChange>) -> (StoreFields, StoreFields) {
    let mut primary = StoreFields::new();
    let mut biographic = StoreFields::new();
    for change in changes.filter(|c| c.is_applicable()) {
        let Some(external) = change.external_field() else {
            continue;
        };
        let target = if change.is_biographic() { &mut biographic } else { &mut primary };
        target.insert(external.to_string(), change.final_value().to_string());
    }
    (primary, biographic)
}

pub struct ApplyEngine {
    store: Arc<dyn RecordStore>,
    registry: Arc<SchemaRegistry>,
}

impl ApplyEngine {
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<SchemaRegistry>) -> Self {
        Self { store, registry }
    }

    /// Ids of created entities are written back into `change_set`.
    pub async fn apply(&self, change_set: &mut ChangeSet) -> ApplyReport {
        let mut report = ApplyReport::default();
        if change_set.review() == ReviewDecision::Discard {
            report.skipped(Phase::Primary, "change set", "review discarded; nothing applied");
            return report;
        }

        self.apply_primary(change_set, &mut report).await;
        self.apply_family(change_set, &mut report).await;
        self.apply_history(change_set, &mut report).await;

        tracing::info!(
            change_set = %change_set.id(),
            created = report.created.len(),
            updated = report.updated.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "apply finished"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Phase 1: primary record
    // ------------------------------------------------------------------------

    async fn apply_primary(&self, change_set: &mut ChangeSet, report: &mut ApplyReport) {
        let (mut primary, biographic) = split_fields(change_set.changes().iter());
        let phase = Phase::Primary;

        let record_id = match change_set.record_id().map(str::to_string) {
            Some(id) => {
                if !primary.is_empty() {
                    match self.store.update_record(&id, &primary).await {
                        Ok(()) => report.updated(phase, "record", &id, format!("{} field(s)", primary.len())),
                        Err(e) => report.error(phase, format!("record {id}"), e.to_string()),
                    }
                }
                id
            }
            None => {
                if primary.is_empty() && biographic.is_empty() {
                    report.skipped(phase, "record", "no approved changes");
                    return;
                }
                let (Some(first), Some(last)) = (primary.remove(FIRST_NAME_FIELD), primary.remove(LAST_NAME_FIELD))
                else {
                    report.error(phase, "record", "cannot create a record without approved first and last name");
                    return;
                };
                let id = match self.store.create_record(&first, &last, &primary).await {
                    Ok(id) => id,
                    Err(e) => {
                        report.error(phase, format!("record {last}, {first}"), e.to_string());
                        return;
                    }
                };
                if let Err(e) = change_set.assign_created_record(id.clone()) {
                    report.error(phase, format!("record {id}"), e.to_string());
                    return;
                }
                report.created(phase, "record", &id, format!("{last}, {first}"));
                id
            }
        };

        if biographic.is_empty() {
            return;
        }
        let existing = match change_set.record().biographic_id.clone() {
            Some(bio_id) => Some(bio_id),
            None => match self.store.get_biographic(&record_id).await {
                Ok(bio) => bio.map(|b| b.id),
                Err(e) => {
                    report.error(phase, format!("biographic of {record_id}"), e.to_string());
                    return;
                }
            },
        };
        match existing {
            Some(bio_id) => match self.store.update_biographic(&bio_id, &biographic).await {
                Ok(()) => report.updated(phase, "biographic", &bio_id, format!("{} field(s)", biographic.len())),
                Err(e) => report.error(phase, format!("biographic {bio_id}"), e.to_string()),
            },
            None => match self.store.create_biographic(&record_id, &biographic).await {
                Ok(bio_id) => {
                    change_set.assign_biographic_id(bio_id.clone());
                    report.created(phase, "biographic", bio_id, format!("{} field(s)", biographic.len()));
                }
                Err(e) => report.error(phase, format!("biographic of {record_id}"), e.to_string()),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Phase 2: family members
    // ------------------------------------------------------------------------

    async fn apply_family(&self, change_set: &mut ChangeSet, report: &mut ApplyReport) {
        let phase = Phase::Family;
        let primary_id = change_set.record_id().map(str::to_string);
        let members: Vec<FamilyMemberCandidate> = change_set.family_members().to_vec();

        for (index, member) in members.iter().enumerate() {
            let entity = format!("{} {}", member.relationship(), member.display_name());
            if member.action() == FamilyAction::Skip {
                report.skipped(phase, entity, "skipped by reviewer");
                continue;
            }
            let Some(primary_id) = primary_id.as_deref() else {
                report.error(phase, entity, "no primary record to link to");
                continue;
            };
            let relationship = self
                .registry
                .relationship(member.relationship())
                .map(|r| r.external_label.clone())
                .unwrap_or_else(|| member.relationship().to_string());

            match member.action() {
                FamilyAction::Skip => {}
                FamilyAction::CreateNew => {
                    self.create_member(change_set, index, member, primary_id, &relationship, &entity, report)
                        .await
                }
                FamilyAction::LinkExisting => {
                    let Some(selected) = member.selected_match() else {
                        report.error(phase, entity, "no matching record selected");
                        continue;
                    };
                    let metadata = LinkMetadata::from_attributes(&member.final_attributes());
                    match self
                        .store
                        .link_relative(primary_id, &selected.record_id, &relationship, &metadata)
                        .await
                    {
                        Ok(()) => report.updated(phase, entity, &selected.record_id, format!("linked as {relationship}")),
                        Err(e) => report.error(phase, entity, format!("link failed: {e}")),
                    }
                }
                FamilyAction::UpdateLinked => {
                    let Some(selected) = member.selected_match() else {
                        report.error(phase, entity, "no matching record selected");
                        continue;
                    };
                    self.update_linked(member, &selected.record_id, &entity, report).await;
                }
            }
        }
    }

    /// Name fields are diffed against the selected record as it is now, so a
    /// reselected or manual match and edited attributes are honoured. A name
    /// change the reviewer rejected stays rejected.
    async fn update_linked(
        &self,
        member: &FamilyMemberCandidate,
        record_id: &str,
        entity: &str,
        report: &mut ApplyReport,
    ) {
        let phase = Phase::Family;
        let current = match self.store.get_record(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                report.error(phase, entity, format!("linked record {record_id} not found"));
                return;
            }
            Err(e) => {
                report.error(phase, entity, e.to_string());
                return;
            }
        };

        let mut fields = StoreFields::new();
        for key in NAME_KEYS {
            let rejected = member
                .field_changes()
                .iter()
                .any(|c| c.field_key() == key && c.has_change() && !c.is_approved());
            if rejected {
                continue;
            }
            let (Some(def), Some(proposed)) = (self.registry.person_field(key), member.final_attr(key)) else {
                continue;
            };
            let Some(external) = def.external_field.as_deref() else {
                continue;
            };
            let existing = current.field(external).map(str::to_string);
            let change = FieldChange::diff(def, existing, proposed, member.confidence());
            if change.has_change() {
                fields.insert(external.to_string(), change.final_value().to_string());
            }
        }

        if fields.is_empty() {
            report.skipped(phase, entity, "no name changes");
            return;
        }
        match self.store.update_record(record_id, &fields).await {
            Ok(()) => report.updated(phase, entity, record_id, format!("{} name field(s)", fields.len())),
            Err(e) => report.error(phase, entity, e.to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_member(
        &self,
        change_set: &mut ChangeSet,
        index: usize,
        member: &FamilyMemberCandidate,
        primary_id: &str,
        relationship: &str,
        entity: &str,
        report: &mut ApplyReport,
    ) {
        let phase = Phase::Family;
        if let Some(existing) = member.created_record_id() {
            report.skipped(phase, entity, format!("already created as {existing}"));
            return;
        }
        let (Some(first), Some(last)) = (member.final_attr(FIRST_NAME), member.final_attr(LAST_NAME)) else {
            report.error(phase, entity, "cannot create a person without first and last name");
            return;
        };

        let mut fields = StoreFields::new();
        let mut biographic = StoreFields::new();
        for def in self.registry.person_fields() {
            if def.key == FIRST_NAME || def.key == LAST_NAME {
                continue;
            }
            let (Some(external), Some(value)) = (def.external_field.as_deref(), member.final_attr(&def.key)) else {
                continue;
            };
            let target = if def.biographic { &mut biographic } else { &mut fields };
            target.insert(external.to_string(), value);
        }

        let person_id = match self.store.create_record(&first, &last, &fields).await {
            Ok(id) => id,
            Err(e) => {
                report.error(phase, entity, format!("create failed: {e}"));
                return;
            }
        };
        if let Err(e) = change_set.assign_family_record(index, person_id.clone()) {
            report.error(phase, entity, e.to_string());
            return;
        }
        report.created(phase, entity, &person_id, "person record");

        if !biographic.is_empty() {
            match self.store.create_biographic(&person_id, &biographic).await {
                Ok(bio_id) => report.created(phase, entity, bio_id, "biographic"),
                Err(e) => report.warning(phase, entity, format!("biographic not created: {e}")),
            }
        }

        let metadata = LinkMetadata::from_attributes(&member.final_attributes());
        match self
            .store
            .link_relative(primary_id, &person_id, relationship, &metadata)
            .await
        {
            Ok(()) => report.updated(phase, entity, &person_id, format!("linked as {relationship}")),
            Err(e) => report.error(phase, entity, format!("created {person_id} but link failed: {e}")),
        }
    }

    // ------------------------------------------------------------------------
    // Phase 3: history
    // ------------------------------------------------------------------------

    /// Rows and notes already saved by an earlier run carry their store id and
    /// are not written again.
    async fn apply_history(&self, change_set: &mut ChangeSet, report: &mut ApplyReport) {
        let phase = Phase::History;
        let sets: Vec<HistorySet> = change_set.history().values().cloned().collect();
        for set in &sets {
            let key = set.history_type.as_str();
            if set.disposition == HistoryDisposition::Skip || set.records.is_empty() {
                report.skipped(phase, key, "nothing to save");
                continue;
            }
            let Some(record_id) = change_set.record_id().map(str::to_string) else {
                report.error(phase, key, "no primary record to attach history to");
                continue;
            };

            let history_type = self.registry.history_type(key);
            let kind = history_type.and_then(|h| h.structured);
            if set.disposition == HistoryDisposition::SaveAsStructuredRecords {
                match kind.filter(|k| self.store.supports_structured(*k)) {
                    Some(kind) => {
                        self.save_structured(change_set, &record_id, set, kind, report).await;
                        continue;
                    }
                    None => report.warning(phase, key, "structured records unsupported; saving as a note"),
                }
            }

            if let Some(note_id) = &set.note_id {
                report.skipped(phase, key, format!("already saved as note {note_id}"));
                continue;
            }
            let note = history_note(key, history_type, &set.records);
            match self.store.create_note(&record_id, &note).await {
                Ok(note_id) => {
                    if let Err(e) = change_set.assign_history_note(key, note_id.clone()) {
                        report.error(phase, key, e.to_string());
                        continue;
                    }
                    report.created(phase, key, note_id, format!("note with {} entries", set.records.len()));
                }
                Err(e) => report.error(phase, key, format!("note not created: {e}")),
            }
        }
    }

    async fn save_structured(
        &self,
        change_set: &mut ChangeSet,
        record_id: &str,
        set: &HistorySet,
        kind: intake_model::StructuredKind,
        report: &mut ApplyReport,
    ) {
        let phase = Phase::History;
        let history_type = self.registry.history_type(&set.history_type);
        for (n, record) in set.records.iter().enumerate() {
            let entity = format!("{}[{n}]", set.history_type);
            if let Some(saved) = &record.saved_id {
                report.skipped(phase, entity, format!("already saved as {saved}"));
                continue;
            }
            let fields: StoreFields = record
                .final_data()
                .into_iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| {
                    let external = history_type
                        .and_then(|h| h.fields.iter().find(|f| f.key == k))
                        .and_then(|f| f.external_field.clone())
                        .unwrap_or(k);
                    (external, v)
                })
                .collect();
            match self.store.create_history_record(record_id, kind, &fields).await {
                Ok(id) => {
                    if let Err(e) = change_set.assign_history_record(&set.history_type, n, id.clone()) {
                        report.warning(phase, entity, e.to_string());
                        continue;
                    }
                    report.created(phase, entity, id, kind.as_str());
                }
                Err(e) => report.warning(phase, entity, e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryRecordStore, Operation};
    use crate::store::Record;
    use intake_model::{
        Attributes, DocumentProvenance, HistoryRecord, MatchMethod, RecordIdentity, RecordMatch, StructuredKind,
    };

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry::standard())
    }

    fn change(key: &str, current: Option<&str>, proposed: &str) -> FieldChange {
        let registry = SchemaRegistry::standard();
        let def = registry.document_type("questionnaire").and_then(|d| d.field(key)).cloned().unwrap();
        FieldChange::diff(&def, current.map(str::to_string), proposed.to_string(), 0.9)
    }

    #[tokio::test]
    async fn test_create_requires_names() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut builder = ChangeSet::builder(DocumentProvenance::default());
        builder.push_change(change("first_name", None, "Maria"));
        builder.push_change(change("cell_phone", None, "555-0100"));
        let mut cs = builder.build();

        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert!(!report.success());
        assert_eq!(report.errors[0].phase, Phase::Primary);
        assert!(store.snapshot().records.is_empty());
    }

    #[tokio::test]
    async fn test_update_splits_biographic() {
        let store = Arc::new(InMemoryRecordStore::new());
        let id = store.create_record("Maria", "Lopez", &StoreFields::new()).await.unwrap();
        let mut builder = ChangeSet::builder(DocumentProvenance::default()).identity(RecordIdentity {
            record_id: Some(id.clone()),
            ..Default::default()
        });
        builder.push_change(change("cell_phone", None, "555-0100"));
        builder.push_change(change("date_of_birth", None, "1985-03-12"));
        builder.push_change(change("last_name", Some("Lopez"), "LOPEZ"));
        let mut cs = builder.build();

        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(store.record(&id).unwrap().field("CellPhone"), Some("555-0100"));
        assert_eq!(store.record(&id).unwrap().field("LastName"), Some("Lopez"));
        assert_eq!(store.biographic_for(&id).unwrap().field("BirthDate"), Some("1985-03-12"));
        assert_eq!(cs.record().biographic_id, store.biographic_for(&id).map(|b| b.id));
    }

    #[tokio::test]
    async fn test_discarded_review_writes_nothing() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut builder = ChangeSet::builder(DocumentProvenance::default());
        builder.push_change(change("first_name", None, "Maria"));
        builder.push_change(change("last_name", None, "Lopez"));
        let mut cs = builder.build();
        cs.set_review(ReviewDecision::Discard);

        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert!(report.success());
        assert!(report.created.is_empty());
        assert!(store.snapshot().records.is_empty());

        store.fail_on(Operation::CreateRecord);
        cs.set_review(ReviewDecision::Proceed);
        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert_eq!(report.phase_errors(Phase::Primary).count(), 1);
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn person(id: &str, first: &str, last: &str) -> Record {
        Record {
            id: id.into(),
            display_name: format!("{last}, {first}"),
            fields: [("FirstName", first), ("LastName", last)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn name_match(id: &str, confidence: f64) -> RecordMatch {
        RecordMatch {
            record_id: id.into(),
            display_name: "Perez, Jose".into(),
            method: MatchMethod::NameOnly,
            confidence,
        }
    }

    /// Primary record 1 plus two name-only "Perez, Jose" candidates 2 and 3.
    fn spouse_with_two_matches() -> (Arc<InMemoryRecordStore>, ChangeSet) {
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert_record(person("1", "Maria", "Perez"));
        store.insert_record(person("2", "Jose", "Perez"));
        store.insert_record(person("3", "Jose", "Perez"));
        let mut builder = ChangeSet::builder(DocumentProvenance::default()).identity(RecordIdentity {
            record_id: Some("1".into()),
            ..Default::default()
        });
        builder.push_family(FamilyMemberCandidate::new(
            "spouse",
            attrs(&[("first_name", "Jose"), ("last_name", "Perez")]),
            0.9,
            vec![name_match("2", 0.6), name_match("3", 0.6)],
            Vec::new(),
            0.9,
        ));
        (store, builder.build())
    }

    #[tokio::test]
    async fn test_update_linked_writes_reselected_match_with_edits() {
        let (store, mut cs) = spouse_with_two_matches();
        assert_eq!(cs.family_members()[0].action(), FamilyAction::Skip);
        cs.select_family_match(0, 1).unwrap();
        cs.set_family_action(0, FamilyAction::UpdateLinked).unwrap();
        cs.edit_family_attribute(0, "first_name", "José").unwrap();

        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(store.record("3").unwrap().field("FirstName"), Some("José"));
        assert_eq!(store.record("3").unwrap().field("LastName"), Some("Perez"));
        assert_eq!(store.record("2").unwrap().field("FirstName"), Some("Jose"));
        assert!(report
            .updated
            .iter()
            .any(|u| u.phase == Phase::Family && u.id.as_deref() == Some("3")));
    }

    #[tokio::test]
    async fn test_skip_switched_to_update_linked_uses_manual_match() {
        let (store, mut cs) = spouse_with_two_matches();
        store.insert_record(person("9", "Joseph", "Peres"));
        cs.add_manual_match(0, "9", "Peres, Joseph").unwrap();
        cs.set_family_action(0, FamilyAction::UpdateLinked).unwrap();

        let report = ApplyEngine::new(store.clone(), registry()).apply(&mut cs).await;
        assert!(report.success(), "{:?}", report.errors);
        let updated = store.record("9").unwrap();
        assert_eq!(updated.field("FirstName"), Some("Jose"));
        assert_eq!(updated.field("LastName"), Some("Perez"));
        assert_eq!(store.record("2").unwrap().field("FirstName"), Some("Jose"));
    }

    #[tokio::test]
    async fn test_update_linked_keeps_rejected_name() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.insert_record(person("1", "Maria", "Perez"));
        store.insert_record(person("2", "Jose", "Perez"));
        let registry = SchemaRegistry::standard();
        let first = registry.person_field("first_name").cloned().unwrap();
        let mut builder = ChangeSet::builder(DocumentProvenance::default()).identity(RecordIdentity {
            record_id: Some("1".into()),
            ..Default::default()
        });
        builder.push_family(FamilyMemberCandidate::new(
            "spouse",
            attrs(&[("first_name", "Joseph"), ("last_name", "Perez")]),
            0.95,
            vec![name_match("2", 0.95)],
            vec![FieldChange::diff(&first, Some("Jose".into()), "Joseph".into(), 0.95)],
            0.9,
        ));
        let mut cs = builder.build();
        cs.approve_family_field(0, "first_name", false).unwrap();

        let report = ApplyEngine::new(store.clone(), Arc::new(registry)).apply(&mut cs).await;
        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(store.record("2").unwrap().field("FirstName"), Some("Jose"));
        assert!(report.skipped.iter().any(|s| s.detail == "no name changes"));
    }

    #[tokio::test]
    async fn test_second_apply_writes_nothing_new() {
        let store = Arc::new(InMemoryRecordStore::new().with_structured(&[StructuredKind::Address]));
        store.insert_record(person("1", "Maria", "Perez"));
        let mut builder = ChangeSet::builder(DocumentProvenance::default()).identity(RecordIdentity {
            record_id: Some("1".into()),
            ..Default::default()
        });
        builder.push_family(FamilyMemberCandidate::new(
            "child",
            attrs(&[("first_name", "Ana"), ("last_name", "Perez"), ("date_of_birth", "2015-06-01")]),
            0.9,
            Vec::new(),
            Vec::new(),
            0.9,
        ));
        let address = HistoryRecord::new("address", attrs(&[("city", "Austin")]), 0.9, true);
        let employer = HistoryRecord::new("employment", attrs(&[("employer", "Acme")]), 0.9, true);
        builder.insert_history(HistorySet::new("address", vec![address], true));
        builder.insert_history(HistorySet::new("employment", vec![employer], false));
        let mut cs = builder.build();
        cs.set_family_action(0, FamilyAction::CreateNew).unwrap();

        let engine = ApplyEngine::new(store.clone(), registry());
        let first = engine.apply(&mut cs).await;
        assert!(first.success(), "{:?}", first.errors);
        let after_first = store.snapshot();
        assert_eq!(after_first.records.len(), 2);
        assert_eq!(after_first.links.len(), 1);
        assert_eq!(after_first.history.len(), 1);
        assert_eq!(after_first.notes.len(), 1);
        assert!(cs.family_members()[0].created_record_id().is_some());
        assert!(cs.history()["address"].records[0].saved_id.is_some());
        assert!(cs.history()["employment"].note_id.is_some());

        let second = engine.apply(&mut cs).await;
        assert!(second.success(), "{:?}", second.errors);
        assert!(second.created.is_empty(), "{:?}", second.created);
        let after_second = store.snapshot();
        assert_eq!(after_second.records.len(), after_first.records.len());
        assert_eq!(after_second.biographics.len(), after_first.biographics.len());
        assert_eq!(after_second.links.len(), after_first.links.len());
        assert_eq!(after_second.history.len(), after_first.history.len());
        assert_eq!(after_second.notes.len(), after_first.notes.len());
    }
}
