//! End-to-end pipeline runs against the scripted oracle.
//!
//! Each test scripts one oracle reply per stage by matching a phrase that
//! only that stage's prompt contains.

use chrono::NaiveDate;
use intake_extract::*;
use intake_model::{SchemaRegistry, Severity};
use std::sync::Arc;

const DETECT: &str = "Known document types:";
const DIRECT: &str = "Be precise";
const NARRATIVE: &str = "describe what you see";
const CRITIQUE: &str = "review it for errors";
const RETRY: &str = "FIELDS TO RE-EXAMINE";
const VERIFY: &str = "Please VERIFY each one";
const REFINE: &str = "My extraction has these validation errors";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn page() -> Vec<PageImage> {
    vec![
        PageImage::new("image/png", b"page one".to_vec()),
        PageImage::new("image/png", b"page two".to_vec()),
    ]
}

fn pipeline(oracle: Arc<ScriptedOracle>, config: PipelineConfig) -> Pipeline {
    Pipeline::new(oracle, Arc::new(SchemaRegistry::standard()), config)
}

fn single_strategy(max_iterations: usize) -> PipelineConfig {
    PipelineConfig {
        strategies: vec![Strategy::DirectSchema],
        max_iterations,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_enhanced_run_improves_and_prunes() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(
                DIRECT,
                r#"{"confidence": 0.9, "fields": {
                    "first_name": {"value": "Maria", "confidence": 0.95},
                    "last_name": {"value": "Lopez", "confidence": 0.95},
                    "date_of_birth": {"value": "1985-03-12", "confidence": 0.9},
                    "a_number": {"value": "A12345678", "confidence": 0.9},
                    "city": {"value": "Qeens", "confidence": 0.5}},
                  "family_members": [
                    {"relationship": "spouse", "data": {"first_name": "Jose", "last_name": "Lopez"}, "confidence": 0.9},
                    {"relationship": "child", "data": {"first_name": "Ghost", "last_name": "Lopez"}, "confidence": 0.6}]}"#,
            )
            .on(
                NARRATIVE,
                r#"This is an intake questionnaire. {"confidence": 0.8, "fields": {
                    "city": {"value": "Queens", "confidence": 0.6}},
                  "family_members": [
                    {"relationship": "spouse", "data": {"first_name": "Jose", "last_name": "Lopez"}, "confidence": 0.85}]}"#,
            )
            .on(
                CRITIQUE,
                r#"{"confidence": 0.85, "corrections": [{"field": "city", "old": "Qeens", "new": "Queens", "reason": "typo"}]}"#,
            )
            .on(RETRY, r#"{"fields": {"city": {"value": "Queens", "confidence": 0.92}}}"#)
            .on(
                VERIFY,
                r#"{"family_members": [
                    {"index": 1, "verified": true, "data": {"date_of_birth": "1983-07-30"}},
                    {"index": 2, "verified": false, "reason": "NOT_FOUND"}]}"#,
            ),
    );

    let outcome = pipeline(oracle.clone(), PipelineConfig::default())
        .process_at(&page(), Some("questionnaire"), today())
        .await;

    let extraction = &outcome.extraction;
    assert_eq!(extraction.document_type, "questionnaire");
    assert_eq!(extraction.value("city"), Some("Queens"));
    assert_eq!(extraction.family_members.len(), 1);
    assert_eq!(extraction.family_members[0].data["date_of_birth"], "1983-07-30");
    assert!(outcome.structural_error.is_none());

    assert!(outcome.report.is_valid());
    assert_eq!(outcome.report.by_rule("a_number_format").count(), 1);

    let metrics = &outcome.metrics;
    assert_eq!(metrics.strategies_used, vec!["direct_schema", "narrative_then_extract"]);
    assert_eq!(metrics.oracle_calls, 5);
    assert_eq!(metrics.critique_corrections, 1);
    assert_eq!(metrics.retried_fields, 1);
    assert_eq!(metrics.improved_fields, 1);
    assert_eq!(metrics.family_verified, 1);
    assert_eq!(metrics.family_dropped, 1);
    assert_eq!(metrics.low_confidence_initial, 1);
    assert_eq!(metrics.low_confidence_final, 0);
    assert_eq!(metrics.iterations, 1);

    assert!(!outcome.trace.contains(&Stage::Detect));
    assert!(!outcome.trace.contains(&Stage::Refine));
    assert_eq!(outcome.trace.last(), Some(&Stage::Done));
    assert_eq!(oracle.count_matching(REFINE), 0);
}

#[tokio::test]
async fn test_refinement_fixes_blocking_issue() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(
                DIRECT,
                r#"{"confidence": 0.9, "fields": {
                    "first_name": {"value": "Ana", "confidence": 0.9},
                    "date_of_birth": {"value": "2999-01-01", "confidence": 0.9}}}"#,
            )
            .fail_on(CRITIQUE, "connection reset")
            .on(REFINE, r#"{"fields": {"date_of_birth": {"value": "1999-01-01", "confidence": 0.95}}}"#),
    );

    let outcome = pipeline(oracle.clone(), single_strategy(3))
        .process_at(&page(), Some("questionnaire"), today())
        .await;

    assert_eq!(outcome.extraction.value("date_of_birth"), Some("1999-01-01"));
    assert!((outcome.extraction.confidence - 0.925).abs() < 1e-9);
    assert_eq!(outcome.metrics.blocking_initial, 1);
    assert_eq!(outcome.metrics.blocking_final, 0);
    assert_eq!(outcome.metrics.iterations, 2);
    assert_eq!(oracle.count_matching(REFINE), 1);

    let refine_prompt = oracle
        .calls()
        .into_iter()
        .find(|c| c.prompt.contains(REFINE))
        .unwrap()
        .prompt;
    assert!(refine_prompt.contains("- date_of_birth: Date of birth is in the future"));
}

#[tokio::test]
async fn test_refinement_stops_at_iteration_cap() {
    let stubborn = r#"{"confidence": 0.9, "fields": {
        "first_name": {"value": "Ana", "confidence": 0.9},
        "date_of_birth": {"value": "2999-01-01", "confidence": 0.9}}}"#;
    let oracle = Arc::new(ScriptedOracle::new().otherwise(stubborn));

    let outcome = pipeline(oracle.clone(), single_strategy(3))
        .process_at(&page(), Some("questionnaire"), today())
        .await;

    assert_eq!(outcome.metrics.iterations, 3);
    assert_eq!(oracle.count_matching(REFINE), 2);
    assert_eq!(outcome.report.blocking_count(), 1);
    let refines = outcome.trace.iter().filter(|s| **s == Stage::Refine).count();
    assert_eq!(refines, 2);
}

#[tokio::test]
async fn test_detection_picks_questionnaire_subtype() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(DETECT, r#"{"document_type": "questionnaire", "questionnaire_name": "Asylum Intake Form"}"#)
            .on(DIRECT, r#"{"fields": {"first_name": {"value": "Ana", "confidence": 0.9}}}"#),
    );

    let outcome = pipeline(oracle.clone(), PipelineConfig::basic())
        .process_at(&page(), None, today())
        .await;

    assert_eq!(outcome.extraction.questionnaire_type.as_deref(), Some("questionnaire_589"));
    assert_eq!(outcome.metrics.oracle_calls, 2);
    assert_eq!(outcome.trace.first(), Some(&Stage::Detect));

    let detect_call = &oracle.calls()[0];
    assert_eq!(detect_call.image_count, 1);
    assert_eq!(detect_call.max_tokens, 200);

    let missing: Vec<_> = outcome
        .report
        .by_rule("required_field_missing")
        .filter_map(|i| i.field_key.clone())
        .collect();
    assert_eq!(missing, vec!["last_name", "date_of_birth", "country_of_birth"]);
    assert!(outcome
        .report
        .by_rule("required_field_missing")
        .all(|i| i.severity == Severity::Advisory));
}

#[tokio::test]
async fn test_unknown_type_uses_generic_fields() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .on(DETECT, r#"{"document_type": "utility_bill"}"#)
            .on(DIRECT, r#"{"fields": {"first_name": {"value": "Ana", "confidence": 0.9}}}"#),
    );

    let outcome = pipeline(oracle.clone(), PipelineConfig::basic())
        .process_at(&page(), None, today())
        .await;

    assert_eq!(outcome.extraction.document_type, UNKNOWN_DOCUMENT_TYPE);
    let direct = oracle
        .calls()
        .into_iter()
        .find(|c| c.prompt.contains(DIRECT))
        .unwrap();
    assert!(direct.prompt.contains("- first_name:"));
    assert_eq!(direct.image_count, 2);
}

#[tokio::test]
async fn test_all_strategies_failing_is_structural() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .fail_on(DIRECT, "503")
            .on(NARRATIVE, "I could not read this document."),
    );

    let outcome = pipeline(oracle, PipelineConfig::default())
        .process_at(&page(), Some("passport"), today())
        .await;

    assert!(outcome.extraction.fields.is_empty());
    assert_eq!(outcome.extraction.confidence, 0.0);
    assert!(outcome.structural_error.is_some());
    assert_eq!(outcome.metrics.strategies_used.len(), 2);
}
