//! Whole-workspace flow: scripted oracle → pipeline → diff → snapshot → apply.

use chrono::NaiveDate;
use intake_extract::{PageImage, Pipeline, PipelineConfig, ScriptedOracle};
use intake_model::persistence::{load_snapshot, save_snapshot};
use intake_model::{
    Classification, DocumentProvenance, FamilyAction, HistoryDisposition, MatchMethod, SchemaRegistry,
    StructuredKind,
};
use intake_reconcile::{
    ApplyEngine, Biographic, DiffConfig, DiffEngine, InMemoryRecordStore, Record, StoreFields,
};
use std::sync::Arc;

const DETECT: &str = "Known document types:";
const DIRECT: &str = "Be precise";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn pages() -> Vec<PageImage> {
    vec![PageImage::new("image/png", b"scan".to_vec())]
}

fn fields(pairs: &[(&str, &str)]) -> StoreFields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn store() -> Arc<InMemoryRecordStore> {
    let store = InMemoryRecordStore::new().with_structured(&[StructuredKind::Address]);
    store.insert_record(Record {
        id: "1".into(),
        display_name: "Lopez, Maria".into(),
        fields: fields(&[("FirstName", "Maria"), ("LastName", "Lopez")]),
    });
    store.insert_biographic(Biographic {
        id: "b1".into(),
        record_id: "1".into(),
        fields: fields(&[("BirthDate", "03/12/1985"), ("AlienNumber", "A123456789")]),
    });
    store.insert_record(Record {
        id: "2".into(),
        display_name: "Lopez, Jose".into(),
        fields: fields(&[("FirstName", "Jose"), ("LastName", "Lopez")]),
    });
    store.insert_biographic(Biographic {
        id: "b2".into(),
        record_id: "2".into(),
        fields: fields(&[("AlienNumber", "A222222222")]),
    });
    Arc::new(store)
}

fn pipeline(oracle: ScriptedOracle) -> Pipeline {
    Pipeline::new(Arc::new(oracle), Arc::new(SchemaRegistry::standard()), PipelineConfig::basic())
}

fn diff_engine(store: Arc<InMemoryRecordStore>) -> DiffEngine {
    DiffEngine::new(store, Arc::new(SchemaRegistry::standard()), None, DiffConfig::default())
}

#[tokio::test]
async fn test_questionnaire_flows_into_the_record_store() {
    let oracle = ScriptedOracle::new()
        .on(DETECT, r#"{"document_type": "questionnaire", "questionnaire_name": "I-589 Asylum Intake"}"#)
        .on(
            DIRECT,
            r#"{"confidence": 0.9, "fields": {
                "first_name": {"value": "Maria", "confidence": 0.95},
                "last_name": {"value": "Lopez", "confidence": 0.95},
                "date_of_birth": {"value": "1985-03-12", "confidence": 0.9},
                "a_number": {"value": "A123456789", "confidence": 0.9},
                "city": {"value": "Austin", "confidence": 0.9}},
              "family_members": [
                {"relationship": "spouse", "data": {"first_name": "Jose", "last_name": "Lopez", "a_number": "222222222"}, "confidence": 0.9}],
              "history": {"address": [
                {"data": {"address_line1": "1 Main St", "city": "Austin", "from_date": "2019-02-01"}, "is_current": true, "confidence": 0.9}]}}"#,
        );

    let outcome = pipeline(oracle).process_at(&pages(), None, today()).await;
    assert!(outcome.structural_error.is_none());
    assert_eq!(outcome.extraction.questionnaire_type.as_deref(), Some("questionnaire_589"));
    assert_eq!(outcome.metrics.oracle_calls, 2);

    let store = store();
    let provenance = DocumentProvenance {
        source: "intake.png".into(),
        document_type: outcome.extraction.document_type.clone(),
        questionnaire_type: outcome.extraction.questionnaire_type.clone(),
        page_count: 1,
        sha256: None,
    };
    let mut cs = diff_engine(store.clone()).diff(&outcome.extraction, provenance).await;
    cs.attach_validation(outcome.report.issues.clone());
    cs.attach_metrics(outcome.metrics.clone());

    assert_eq!(cs.record_id(), Some("1"));
    assert_eq!(cs.record().match_method, Some(MatchMethod::Identifier));
    assert_eq!(cs.change("city").unwrap().classification(), Classification::New);
    assert_eq!(cs.total_changes(), 1);
    assert_eq!(cs.family_members()[0].action(), FamilyAction::UpdateLinked);
    assert_eq!(cs.history()["address"].disposition, HistoryDisposition::SaveAsStructuredRecords);

    // Review happens on the snapshot file, not on the in-memory value.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intake.changeset.json");
    save_snapshot(&path, &cs).unwrap();
    let mut reviewed = load_snapshot(&path).unwrap();
    assert_eq!(reviewed, cs);

    let report = ApplyEngine::new(store.clone(), Arc::new(SchemaRegistry::standard()))
        .apply(&mut reviewed)
        .await;
    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(store.record("1").unwrap().field("City"), Some("Austin"));
    assert_eq!(store.snapshot().history.len(), 1);
    assert!(store.snapshot().notes.is_empty());
}

#[tokio::test]
async fn test_unrecognized_document_writes_nothing() {
    let oracle = ScriptedOracle::new()
        .on(DETECT, r#"{"document_type": "utility_bill"}"#)
        .on(
            DIRECT,
            r#"{"confidence": 0.7, "fields": {
                "first_name": {"value": "Maria", "confidence": 0.9},
                "last_name": {"value": "Lopez", "confidence": 0.9}}}"#,
        );

    let outcome = pipeline(oracle).process_at(&pages(), None, today()).await;
    assert!(outcome.structural_error.is_none());

    let store = store();
    let mut cs = diff_engine(store.clone())
        .diff(&outcome.extraction, DocumentProvenance::default())
        .await;
    assert_eq!(cs.errors().to_vec(), vec!["Unknown document type: unknown".to_string()]);
    assert_eq!(cs.total_changes(), 0);

    ApplyEngine::new(store.clone(), Arc::new(SchemaRegistry::standard()))
        .apply(&mut cs)
        .await;
    let after = store.snapshot();
    assert_eq!(after.records.len(), 2);
    assert_eq!(store.record("1").unwrap().field("City"), None);
    assert!(after.history.is_empty() && after.notes.is_empty() && after.links.is_empty());
}
