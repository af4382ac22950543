//! Property tests for normalization, classification and snapshots.

use intake_model::normalize::{normalize, normalize_date, normalize_text};
use intake_model::persistence::{load_snapshot, save_snapshot};
use intake_model::{
    Attributes, ChangeSet, Classification, DocumentProvenance, FamilyAction, FamilyMemberCandidate,
    FieldChange, HistoryRecord, HistorySet, MatchMethod, RecordIdentity, RecordMatch, ReviewDecision,
    SchemaRegistry, Severity, ValidationIssue, ValueType,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn date_strings() -> impl Strategy<Value = String> {
    (1900i32..2100, 1u32..=12, 1u32..=28, 0usize..4).prop_map(|(y, m, d, fmt)| match fmt {
        0 => format!("{y:04}-{m:02}-{d:02}"),
        1 => format!("{m:02}/{d:02}/{y:04}"),
        2 => format!("{y:04}/{m:02}/{d:02}"),
        _ => format!("{m}/{d}/{y:04}"),
    })
}

fn value_types() -> impl Strategy<Value = ValueType> {
    prop_oneof![
        Just(ValueType::Text),
        Just(ValueType::Name),
        Just(ValueType::Date),
        Just(ValueType::Phone),
        Just(ValueType::Identifier),
        Just(ValueType::Email),
    ]
}

fn field_keys() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("first_name"),
        Just("last_name"),
        Just("date_of_birth"),
        Just("cell_phone"),
        Just("a_number"),
        Just("city"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_normalize_idempotent(value in "[a-zA-Z0-9 /()-]{0,24}", ty in value_types()) {
        let once = normalize(&value, ty);
        prop_assert_eq!(normalize(&once, ty), once);
    }

    #[test]
    fn prop_date_formats_agree(date in date_strings()) {
        let canonical = normalize_date(&date);
        prop_assert_eq!(canonical.len(), 10);
        prop_assert_eq!(normalize_date(&canonical), canonical);
    }

    #[test]
    fn prop_text_whitespace_insensitive(value in "[a-zA-Z ]{0,24}") {
        let padded = format!("  {}  ", value.replace(' ', "   "));
        prop_assert_eq!(normalize_text(&padded), normalize_text(&value));
    }

    #[test]
    fn prop_has_change_matches_classification(
        key in field_keys(),
        current in proptest::option::of("[a-zA-Z0-9 ]{0,12}"),
        proposed in "[a-zA-Z0-9 ]{1,12}",
    ) {
        let registry = SchemaRegistry::standard();
        let def = registry.document_type("questionnaire").unwrap().field(key).unwrap();
        let change = FieldChange::diff(def, current, proposed, 0.9);
        let changed = matches!(change.classification(), Classification::New | Classification::Modified);
        prop_assert_eq!(change.has_change(), changed);
        prop_assert_eq!(change.is_approved(), changed);
        prop_assert_eq!(change.final_value(), change.proposed_value());
    }

    #[test]
    fn prop_final_value_is_override(
        proposed in "[a-z]{1,10}",
        over in proptest::option::of("[A-Z]{1,10}"),
    ) {
        let registry = SchemaRegistry::standard();
        let def = registry.document_type("questionnaire").unwrap().field("city").unwrap();
        let mut builder = ChangeSet::builder(DocumentProvenance::default());
        builder.push_change(FieldChange::diff(def, None, proposed.clone(), 0.8));
        let mut cs = builder.build();
        cs.set_override("city", over.clone()).unwrap();
        let expected = over.unwrap_or(proposed);
        prop_assert_eq!(cs.change("city").unwrap().final_value(), expected.as_str());
    }
}

// ============================================================================
// Snapshots
// ============================================================================

fn populated_change_set() -> ChangeSet {
    let registry = SchemaRegistry::standard();
    let q = registry.document_type("questionnaire").unwrap();

    let mut builder = ChangeSet::builder(DocumentProvenance {
        source: "intake/maria.pdf".into(),
        document_type: "questionnaire".into(),
        questionnaire_type: Some("questionnaire_589".into()),
        page_count: 3,
        sha256: Some("ab".repeat(32)),
    })
    .identity(RecordIdentity {
        record_id: Some("1001".into()),
        display_name: "Lopez, Maria".into(),
        identifier: Some("123456789".into()),
        match_method: Some(MatchMethod::Identifier),
        match_confidence: Some(1.0),
        biographic_id: Some("b-7".into()),
        alternatives: vec![],
    })
    .extraction_confidence(0.87);

    builder.push_change(FieldChange::diff(
        q.field("date_of_birth").unwrap(),
        Some("01/15/1990".into()),
        "1990-01-15".into(),
        0.92,
    ));
    builder.push_change(FieldChange::diff(q.field("city").unwrap(), None, "Queens".into(), 0.8));

    let mut spouse = Attributes::new();
    spouse.insert("first_name".into(), "Jose".into());
    spouse.insert("last_name".into(), "Lopez".into());
    builder.push_family(FamilyMemberCandidate::new(
        "spouse",
        spouse,
        0.9,
        vec![RecordMatch {
            record_id: "1002".into(),
            display_name: "Lopez, Jose".into(),
            method: MatchMethod::NameAndBirthDate,
            confidence: 0.95,
        }],
        vec![],
        0.9,
    ));

    let mut addr = Attributes::new();
    addr.insert("city".into(), "Quito".into());
    addr.insert("from_date".into(), "2015-01-01".into());
    builder.insert_history(HistorySet::new(
        "address",
        vec![HistoryRecord::new("address", addr, 0.85, false)],
        true,
    ));
    builder.insert_other("passport_number", serde_json::json!("X123"));
    builder.push_error("page 3 was blank");

    let mut cs = builder.build();
    cs.attach_validation(vec![ValidationIssue::new(
        "low_confidence",
        Severity::Advisory,
        "low confidence",
    )
    .field("city")]);
    cs.set_override("city", Some("Queens Village".into())).unwrap();
    cs.set_family_action(0, FamilyAction::LinkExisting).unwrap();
    cs.set_review(ReviewDecision::Proceed);
    cs
}

#[test]
fn test_snapshot_roundtrip_preserves_review_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("snapshot.json");
    let cs = populated_change_set();

    save_snapshot(&path, &cs).unwrap();
    let loaded = load_snapshot(&path).unwrap();

    assert_eq!(loaded, cs);
    assert_eq!(loaded.change("city").unwrap().final_value(), "Queens Village");
    assert_eq!(loaded.family_members()[0].action(), FamilyAction::LinkExisting);
    assert_eq!(loaded.review(), ReviewDecision::Proceed);
}

#[test]
fn test_snapshot_overwrite_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let cs = populated_change_set();
    save_snapshot(&path, &cs).unwrap();
    save_snapshot(&path, &cs).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_discard_marker_parses() {
    let cs = populated_change_set();
    let json = intake_model::persistence::to_json(&cs)
        .unwrap()
        .replace("\"review\": \"proceed\"", "\"review\": \"discard\"");
    let loaded = intake_model::persistence::from_json(&json).unwrap();
    assert_eq!(loaded.review(), ReviewDecision::Discard);
}

#[test]
fn test_unchanged_dates_are_not_counted() {
    let cs = populated_change_set();
    assert_eq!(cs.total_changes(), 1);
    assert_eq!(cs.approved_changes().count(), 1);
}
