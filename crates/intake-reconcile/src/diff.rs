//! Reconciliation: extraction + current Record Store state → Change Set.
//!
//! ```text
//! Extraction ──► Matcher (primary) ──► current values ──► FieldChange per mapped field
//!      │                                                  (document-only → other)
//!      ├── family_members ──► Matcher (per person) ──► FamilyMemberCandidate
//!      └── history ──► HistorySet (structured if the store supports the kind)
//! ```
//!
//! Nothing here writes to the store.

use crate::cache::IdentifierCache;
use crate::matcher::{MatchedRecord, Matcher, PersonQuery};
use crate::store::{Biographic, RecordStore};
use intake_model::schema::{IDENTIFIER, NAME_KEYS};
use intake_model::{
    ChangeSet, ChangeSetBuilder, DocumentProvenance, Extraction, FamilyExtraction,
    FamilyMemberCandidate, FieldChange, HistoryRecord, HistorySet, MatchMethod, RecordIdentity,
    SchemaRegistry,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DEFAULT_FAMILY_MATCH_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct DiffConfig {
    /// A family match at or above this confidence defaults to UPDATE_LINKED.
    pub family_match_threshold: f64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            family_match_threshold: DEFAULT_FAMILY_MATCH_THRESHOLD,
        }
    }
}

pub struct DiffEngine {
    store: Arc<dyn RecordStore>,
    registry: Arc<SchemaRegistry>,
    matcher: Matcher,
    config: DiffConfig,
}

impl DiffEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<SchemaRegistry>,
        cache: Option<Arc<IdentifierCache>>,
        config: DiffConfig,
    ) -> Self {
        Self {
            matcher: Matcher::new(store.clone(), cache),
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    pub async fn diff(&self, extraction: &Extraction, provenance: DocumentProvenance) -> ChangeSet {
        let Some(doc_type) = self
            .registry
            .resolve(&extraction.document_type, extraction.questionnaire_type.as_deref())
        else {
            tracing::warn!(document_type = %extraction.document_type, "unknown document type; no changes proposed");
            let mut builder = ChangeSet::builder(provenance).extraction_confidence(extraction.confidence);
            builder.push_error(format!("Unknown document type: {}", extraction.document_type));
            self.copy_other(&mut builder, extraction);
            return builder.build();
        };

        let query = PersonQuery::from_extraction(extraction);
        let matches = self.matcher.find(&query).await;
        let primary = matches.first();
        let biographic = match primary {
            Some(m) => self.biographic_of(&m.record.id).await,
            None => None,
        };

        let identity = RecordIdentity {
            record_id: primary.map(|m| m.record.id.clone()),
            display_name: primary
                .map(|m| m.record.display_name.clone())
                .or_else(|| query.display_name())
                .unwrap_or_default(),
            identifier: extraction.value(IDENTIFIER).map(str::to_string),
            match_method: primary.map(|m| m.method),
            match_confidence: primary.map(|m| m.confidence),
            biographic_id: biographic.as_ref().map(|b| b.id.clone()),
            alternatives: matches.iter().skip(1).map(MatchedRecord::to_record_match).collect(),
        };

        let mut builder = ChangeSet::builder(provenance)
            .identity(identity)
            .extraction_confidence(extraction.confidence);

        if matches.len() > 1 && matches[0].method == MatchMethod::NameOnly {
            builder.push_error(format!(
                "Ambiguous match: {} records share the name '{}'; using {} ({}). Verify before applying.",
                matches.len(),
                query.display_name().unwrap_or_default(),
                matches[0].record.display_name,
                matches[0].record.id,
            ));
        }

        // Mapped fields against current values; document-only fields to other.
        let mut known = BTreeSet::new();
        for def in &doc_type.fields {
            known.insert(def.key.as_str());
            let Some(field) = extraction.fields.get(&def.key) else {
                continue;
            };
            let proposed = field.value.trim();
            if proposed.is_empty() {
                continue;
            }
            let Some(external) = def.external_field.as_deref() else {
                builder.insert_other(def.key.clone(), json!({"value": proposed, "confidence": field.confidence}));
                continue;
            };
            let current = if def.biographic {
                biographic.as_ref().and_then(|b| b.field(external))
            } else {
                primary.and_then(|m| m.record.field(external))
            };
            builder.push_change(FieldChange::diff(
                def,
                current.map(str::to_string),
                proposed.to_string(),
                field.confidence,
            ));
        }
        for (key, field) in &extraction.fields {
            if !known.contains(key.as_str()) && !field.value.trim().is_empty() {
                builder.insert_other(key.clone(), json!({"value": field.value.trim(), "confidence": field.confidence}));
            }
        }
        self.copy_other(&mut builder, extraction);

        for member in &extraction.family_members {
            let candidate = self.family_candidate(member).await;
            builder.push_family(candidate);
        }

        for (key, entries) in &extraction.history {
            let records: Vec<HistoryRecord> = entries
                .iter()
                .filter(|e| !e.is_empty())
                .map(|e| HistoryRecord::new(key.clone(), e.data.clone(), e.confidence, e.is_current))
                .collect();
            if records.is_empty() {
                continue;
            }
            let supported = self
                .registry
                .history_type(key)
                .and_then(|h| h.structured)
                .is_some_and(|kind| self.store.supports_structured(kind));
            builder.insert_history(HistorySet::new(key.clone(), records, supported));
        }

        let change_set = builder.build();
        tracing::info!(
            document_type = %doc_type.key,
            record_id = change_set.record_id().unwrap_or("(none)"),
            changes = change_set.total_changes(),
            family = change_set.family_members().len(),
            history = change_set.history().len(),
            "change set built"
        );
        change_set
    }

    fn copy_other(&self, builder: &mut ChangeSetBuilder, extraction: &Extraction) {
        for (key, value) in &extraction.other {
            builder.insert_other(key.clone(), value.clone());
        }
    }

    async fn biographic_of(&self, record_id: &str) -> Option<Biographic> {
        match self.store.get_biographic(record_id).await {
            Ok(bio) => bio,
            Err(e) => {
                tracing::warn!(error = %e, record_id, "biographic lookup failed; treating as absent");
                None
            }
        }
    }

    async fn family_candidate(&self, member: &FamilyExtraction) -> FamilyMemberCandidate {
        let matches = self.matcher.find(&PersonQuery::from_attributes(&member.data)).await;
        let threshold = self.config.family_match_threshold;

        // Name changes only against a match that will be updated by default.
        let mut best: Option<&MatchedRecord> = None;
        for m in &matches {
            if best.map_or(true, |b| m.confidence > b.confidence) {
                best = Some(m);
            }
        }
        let mut field_changes = Vec::new();
        if let Some(best) = best.filter(|b| b.confidence >= threshold) {
            for key in NAME_KEYS {
                let (Some(def), Some(proposed)) = (self.registry.person_field(key), member.attr(key)) else {
                    continue;
                };
                let current = def
                    .external_field
                    .as_deref()
                    .and_then(|ext| best.record.field(ext))
                    .map(str::to_string);
                field_changes.push(FieldChange::diff(def, current, proposed.to_string(), member.confidence));
            }
        }

        FamilyMemberCandidate::new(
            member.relationship.clone(),
            member.data.clone(),
            member.confidence,
            matches.iter().map(MatchedRecord::to_record_match).collect(),
            field_changes,
            threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;
    use crate::store::{Biographic, Record, StoreFields};
    use intake_model::{Classification, ExtractedField, FamilyAction, HistoryDisposition, HistoryEntry, StructuredKind};

    fn fields(pairs: &[(&str, &str)]) -> StoreFields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn extraction(doc: &str, pairs: &[(&str, &str)]) -> Extraction {
        let mut e = Extraction::empty();
        e.document_type = doc.to_string();
        e.confidence = 0.9;
        for (k, v) in pairs {
            e.fields.insert(k.to_string(), ExtractedField::new(*v, 0.9));
        }
        e
    }

    fn engine(store: InMemoryRecordStore) -> DiffEngine {
        DiffEngine::new(
            Arc::new(store),
            Arc::new(SchemaRegistry::standard()),
            None,
            DiffConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_no_match_makes_everything_new() {
        let e = extraction("passport", &[("first_name", "Maria"), ("last_name", "Lopez"), ("passport_number", "X123")]);
        let cs = engine(InMemoryRecordStore::new()).diff(&e, DocumentProvenance::default()).await;
        assert!(cs.record_id().is_none());
        assert_eq!(cs.record().display_name, "Lopez, Maria");
        let first = cs.change("first_name").unwrap();
        assert_eq!(first.classification(), Classification::New);
        assert!(first.is_approved());
        assert!(cs.change("passport_number").is_none());
        assert_eq!(cs.other()["passport_number"]["value"], "X123");
    }

    #[tokio::test]
    async fn test_biographic_values_compare_normalized() {
        let store = InMemoryRecordStore::new();
        store.insert_record(Record {
            id: "7".into(),
            display_name: "Lopez, Maria".into(),
            fields: fields(&[("FirstName", "Maria"), ("LastName", "Lopez")]),
        });
        store.insert_biographic(Biographic {
            id: "b7".into(),
            record_id: "7".into(),
            fields: fields(&[("BirthDate", "03/12/1985"), ("AlienNumber", "A-123-456-789")]),
        });
        let e = extraction(
            "green_card",
            &[("first_name", "MARIA"), ("last_name", "Lopez"), ("date_of_birth", "1985-03-12"), ("a_number", "123456789")],
        );
        let cs = engine(store).diff(&e, DocumentProvenance::default()).await;
        assert_eq!(cs.record_id(), Some("7"));
        assert_eq!(cs.record().match_method, Some(MatchMethod::Identifier));
        assert_eq!(cs.record().biographic_id.as_deref(), Some("b7"));
        let dob = cs.change("date_of_birth").unwrap();
        assert_eq!(dob.classification(), Classification::Unchanged);
        assert!(!dob.is_approved());
        assert_eq!(cs.change("first_name").unwrap().classification(), Classification::Unchanged);
        assert_eq!(cs.total_changes(), 0);
    }

    #[tokio::test]
    async fn test_unknown_document_type_is_non_fatal() {
        let e = extraction("utility_bill", &[("first_name", "Maria")]);
        let cs = engine(InMemoryRecordStore::new()).diff(&e, DocumentProvenance::default()).await;
        assert!(cs.changes().is_empty());
        assert_eq!(cs.errors(), ["Unknown document type: utility_bill"]);
    }

    #[tokio::test]
    async fn test_family_and_history_candidates() {
        let store = InMemoryRecordStore::new().with_structured(&[StructuredKind::Address]);
        store.insert_record(Record {
            id: "20".into(),
            display_name: "Perez, Juan".into(),
            fields: fields(&[("FirstName", "Juan"), ("LastName", "Perez")]),
        });
        store.insert_biographic(Biographic {
            id: "b20".into(),
            record_id: "20".into(),
            fields: fields(&[("AlienNumber", "A200000000")]),
        });

        let mut e = extraction("questionnaire", &[("first_name", "Maria"), ("last_name", "Lopez")]);
        let member = |first: &str, last: &str, a: Option<&str>| {
            let mut data = intake_model::Attributes::new();
            data.insert("first_name".into(), first.into());
            data.insert("last_name".into(), last.into());
            if let Some(a) = a {
                data.insert("a_number".into(), a.into());
            }
            FamilyExtraction {
                relationship: "spouse".into(),
                data,
                confidence: 0.85,
            }
        };
        e.family_members.push(member("Juana", "Perez", Some("200000000")));
        e.family_members.push(member("Luis", "Lopez", None));
        let entry = |city: &str| HistoryEntry {
            data: [("city".to_string(), city.to_string())].into_iter().collect(),
            is_current: false,
            confidence: 0.8,
        };
        e.history.insert("address".into(), vec![entry("Austin"), entry(" ")]);
        e.history.insert("employment".into(), vec![entry("Dallas")]);
        e.history.insert("education".into(), vec![]);

        let cs = engine(store).diff(&e, DocumentProvenance::default()).await;

        let spouse = &cs.family_members()[0];
        assert_eq!(spouse.action(), FamilyAction::UpdateLinked);
        assert_eq!(spouse.selected_match().unwrap().record_id, "20");
        let first = spouse.field_changes().iter().find(|c| c.field_key() == "first_name").unwrap();
        assert_eq!(first.classification(), Classification::Modified);
        assert_eq!(cs.family_members()[1].action(), FamilyAction::Skip);
        assert!(cs.family_members()[1].field_changes().is_empty());

        assert_eq!(cs.history()["address"].records.len(), 1);
        assert_eq!(cs.history()["address"].disposition, HistoryDisposition::SaveAsStructuredRecords);
        assert_eq!(cs.history()["employment"].disposition, HistoryDisposition::SaveAsNote);
        assert!(!cs.history().contains_key("education"));
    }
}
