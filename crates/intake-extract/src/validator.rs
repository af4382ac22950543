//! Validation Rule Engine
//!
//! A pure battery of checks over one extraction. Findings are data, never
//! errors. Today's date is passed in so results are reproducible.
//!
//! ```text
//! required ─ identifier ─ date format ─ date consistency ─ names
//!     └──────── field confidence ─ family ─ history ───────────┘
//! ```

use intake_model::normalize::{parse_date_with, title_case};
use intake_model::schema::{DATE_OF_BIRTH, FIRST_NAME, IDENTIFIER, LAST_NAME, MIDDLE_NAME};
use intake_model::{Extraction, SchemaRegistry, Severity, ValidationIssue, ValidationReport};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::{Arc, OnceLock};

pub const LOW_CONFIDENCE_RULE: &str = "low_confidence";

const ACCEPTED_DATE_PATTERNS: &[&str] = &[
    r"^\d{4}-\d{2}-\d{2}$",
    r"^\d{2}/\d{2}/\d{4}$",
    r"^\d{2}-\d{2}-\d{4}$",
    r"^\d{1,2}/\d{1,2}/\d{4}$",
];

/// Formats tried when comparing dates to each other.
const CONSISTENCY_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%d/%m/%Y"];

const MAX_AGE_YEARS: i32 = 120;
const MIN_MARRIAGE_AGE_YEARS: i32 = 14;

fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ACCEPTED_DATE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Digits of an identifier after dropping spaces, dashes and one leading `A`,
/// when what remains is 8 or 9 digits.
pub fn identifier_digits(value: &str) -> Option<String> {
    let compact: String = value.chars().filter(|c| *c != ' ' && *c != '-').collect();
    let digits = compact
        .strip_prefix('A')
        .or_else(|| compact.strip_prefix('a'))
        .unwrap_or(&compact);
    let valid = (8..=9).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    valid.then(|| digits.to_string())
}

fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

fn is_all_caps(value: &str) -> bool {
    value.chars().any(char::is_alphabetic) && !value.chars().any(char::is_lowercase)
}

#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<SchemaRegistry>,
    confidence_floor: f64,
}

impl Validator {
    pub fn new(registry: Arc<SchemaRegistry>, confidence_floor: f64) -> Self {
        Self {
            registry,
            confidence_floor,
        }
    }

    pub fn confidence_floor(&self) -> f64 {
        self.confidence_floor
    }

    pub fn validate(&self, extraction: &Extraction, today: NaiveDate) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_required(extraction, &mut report);
        self.check_identifier(extraction, &mut report);
        self.check_date_formats(extraction, &mut report);
        self.check_date_consistency(extraction, today, &mut report);
        self.check_names(extraction, &mut report);
        self.check_confidence(extraction, &mut report);
        self.check_family(extraction, &mut report);
        self.check_history(extraction, &mut report);

        tracing::debug!(
            blocking = report.blocking_count(),
            advisory = report.advisory_count(),
            info = report.informational_count(),
            "validation complete"
        );
        report
    }

    fn check_required(&self, extraction: &Extraction, report: &mut ValidationReport) {
        let Some(doc) = self
            .registry
            .resolve(&extraction.document_type, extraction.questionnaire_type.as_deref())
        else {
            return;
        };
        for key in &doc.required {
            match extraction.fields.get(key) {
                None => report.push(
                    ValidationIssue::new(
                        "required_field_missing",
                        Severity::Advisory,
                        format!("Required field '{key}' not found"),
                    )
                    .field(key),
                ),
                Some(field) if field.value.trim().is_empty() => report.push(
                    ValidationIssue::new(
                        "required_field_empty",
                        Severity::Advisory,
                        format!("Required field '{key}' is empty"),
                    )
                    .field(key),
                ),
                Some(_) => {}
            }
        }
    }

    fn check_identifier(&self, extraction: &Extraction, report: &mut ValidationReport) {
        let Some(value) = extraction.value(IDENTIFIER) else {
            return;
        };
        let compact: String = value.chars().filter(|c| *c != ' ' && *c != '-').collect();
        match identifier_digits(value) {
            None => report.push(
                ValidationIssue::new(
                    "invalid_a_number",
                    Severity::Blocking,
                    format!("Invalid A-number format: '{compact}'. Expected 8-9 digits."),
                )
                .field(IDENTIFIER)
                .current(compact),
            ),
            Some(digits) if digits.len() == 8 => report.push(
                ValidationIssue::new(
                    "a_number_format",
                    Severity::Informational,
                    "A-number has 8 digits, may need leading zero",
                )
                .field(IDENTIFIER)
                .current(compact)
                .suggest(format!("A{digits:0>9}")),
            ),
            Some(_) => {}
        }
    }

    fn check_date_formats(&self, extraction: &Extraction, report: &mut ValidationReport) {
        for (key, field) in &extraction.fields {
            if !self.registry.is_date_key(key) {
                continue;
            }
            let value = field.value.trim();
            if value.is_empty() || date_patterns().iter().any(|re| re.is_match(value)) {
                continue;
            }
            report.push(
                ValidationIssue::new(
                    "invalid_date_format",
                    Severity::Advisory,
                    format!("Date field '{key}' has non-standard format: '{value}'"),
                )
                .field(key)
                .current(value),
            );
        }
    }

    fn check_date_consistency(&self, extraction: &Extraction, today: NaiveDate, report: &mut ValidationReport) {
        let date = |key: &str| {
            extraction
                .value(key)
                .and_then(|v| parse_date_with(v, CONSISTENCY_DATE_FORMATS))
        };
        let dob = date(DATE_OF_BIRTH);
        let entry = date("date_of_entry");
        let marriage = date("date_of_marriage");

        let Some(dob) = dob else {
            return;
        };

        if dob > today {
            report.push(
                ValidationIssue::new("future_dob", Severity::Blocking, "Date of birth is in the future")
                    .field(DATE_OF_BIRTH)
                    .current(dob.to_string()),
            );
        }
        if today.year() - dob.year() > MAX_AGE_YEARS {
            report.push(
                ValidationIssue::new(
                    "unreasonable_dob",
                    Severity::Blocking,
                    format!("Date of birth is more than {MAX_AGE_YEARS} years ago"),
                )
                .field(DATE_OF_BIRTH)
                .current(dob.to_string()),
            );
        }
        if let Some(entry) = entry.filter(|e| *e < dob) {
            report.push(
                ValidationIssue::new("entry_before_birth", Severity::Blocking, "Date of entry is before date of birth")
                    .field("date_of_entry")
                    .current(entry.to_string()),
            );
        }
        if let Some(marriage) = marriage {
            if marriage < dob {
                report.push(
                    ValidationIssue::new(
                        "marriage_before_birth",
                        Severity::Blocking,
                        "Marriage date is before date of birth",
                    )
                    .field("date_of_marriage")
                    .current(marriage.to_string()),
                );
            } else if marriage.year() - dob.year() < MIN_MARRIAGE_AGE_YEARS {
                report.push(
                    ValidationIssue::new(
                        "marriage_too_young",
                        Severity::Advisory,
                        format!("Person was under {MIN_MARRIAGE_AGE_YEARS} at marriage date"),
                    )
                    .field("date_of_marriage")
                    .current(marriage.to_string()),
                );
            }
        }
    }

    fn check_names(&self, extraction: &Extraction, report: &mut ValidationReport) {
        for key in [FIRST_NAME, LAST_NAME, MIDDLE_NAME] {
            let Some(value) = extraction.value(key) else {
                continue;
            };
            if value.chars().any(|c| c.is_ascii_digit()) {
                report.push(
                    ValidationIssue::new(
                        "name_contains_numbers",
                        Severity::Advisory,
                        format!("Name field '{key}' contains numbers: '{value}'"),
                    )
                    .field(key)
                    .current(value),
                );
            }
            if value.chars().count() > 2 && is_all_caps(value) {
                report.push(
                    ValidationIssue::new(
                        "name_all_caps",
                        Severity::Informational,
                        format!("Name field '{key}' is all caps"),
                    )
                    .field(key)
                    .current(value)
                    .suggest(title_case(value)),
                );
            }
        }

        if let (Some(first), Some(last)) = (extraction.value(FIRST_NAME), extraction.value(LAST_NAME)) {
            if last.chars().count() < 3 && first.chars().count() > 5 {
                report.push(
                    ValidationIssue::new(
                        "possible_name_swap",
                        Severity::Informational,
                        "First and last names may be swapped",
                    )
                    .field(FIRST_NAME)
                    .current(format!("{first} {last}"))
                    .suggest(format!("{last} {first}")),
                );
            }
        }
    }

    fn check_confidence(&self, extraction: &Extraction, report: &mut ValidationReport) {
        for (key, field) in extraction.low_confidence_fields(self.confidence_floor) {
            report.push(
                ValidationIssue::new(
                    LOW_CONFIDENCE_RULE,
                    Severity::Advisory,
                    format!("Low confidence ({}) on field '{key}'", percent(field.confidence)),
                )
                .field(key)
                .current(field.value.clone()),
            );
        }
    }

    fn check_family(&self, extraction: &Extraction, report: &mut ValidationReport) {
        for (i, member) in extraction.family_members.iter().enumerate() {
            let key = format!("family_members[{i}]");
            if member.attr(FIRST_NAME).is_none() && member.attr(LAST_NAME).is_none() {
                report.push(
                    ValidationIssue::new(
                        "family_member_no_name",
                        Severity::Advisory,
                        format!("Family member {} ({}) has no name", i + 1, member.relationship),
                    )
                    .field(key.clone()),
                );
            }
            if member.confidence < self.confidence_floor {
                report.push(
                    ValidationIssue::new(
                        "family_member_low_confidence",
                        Severity::Advisory,
                        format!(
                            "Low confidence ({}) on family member: {}",
                            percent(member.confidence),
                            member.relationship
                        ),
                    )
                    .field(key),
                );
            }
        }
    }

    fn check_history(&self, extraction: &Extraction, report: &mut ValidationReport) {
        for (history_type, entries) in &extraction.history {
            for (i, entry) in entries.iter().enumerate() {
                let key = format!("history.{history_type}[{i}]");
                if entry.is_empty() {
                    report.push(
                        ValidationIssue::new(
                            "empty_history_record",
                            Severity::Informational,
                            format!("Empty {history_type} record at index {i}"),
                        )
                        .field(key.clone()),
                    );
                }
                if entry.confidence < self.confidence_floor {
                    report.push(
                        ValidationIssue::new(
                            "history_low_confidence",
                            Severity::Advisory,
                            format!(
                                "Low confidence ({}) on {history_type} record {}",
                                percent(entry.confidence),
                                i + 1
                            ),
                        )
                        .field(key),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_model::{Attributes, ExtractedField, FamilyExtraction, HistoryEntry};

    fn validator() -> Validator {
        Validator::new(Arc::new(SchemaRegistry::standard()), 0.7)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    fn extraction(doc: &str, fields: &[(&str, &str)]) -> Extraction {
        let mut e = Extraction::empty();
        e.document_type = doc.into();
        for (k, v) in fields {
            e.fields.insert(k.to_string(), ExtractedField::new(*v, 0.95));
        }
        e
    }

    fn rules(report: &ValidationReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.rule.as_str()).collect()
    }

    #[test]
    fn test_identifier_digits() {
        assert_eq!(identifier_digits("A123-456-789").as_deref(), Some("123456789"));
        assert_eq!(identifier_digits("a 12345678").as_deref(), Some("12345678"));
        assert!(identifier_digits("1234567").is_none());
        assert!(identifier_digits("AA12345678").is_none());
        assert!(identifier_digits("1234567890").is_none());
    }

    #[test]
    fn test_eight_digit_identifier_is_informational() {
        let report = validator().validate(&extraction("questionnaire", &[("a_number", "A12345678")]), today());
        let issue = report.by_rule("a_number_format").next().unwrap();
        assert_eq!(issue.severity, Severity::Informational);
        assert_eq!(issue.suggested_value.as_deref(), Some("A012345678"));
        assert!(report.is_valid());
    }

    #[test]
    fn test_bad_identifier_blocks() {
        let report = validator().validate(&extraction("questionnaire", &[("a_number", "A12-34")]), today());
        let issue = report.by_rule("invalid_a_number").next().unwrap();
        assert_eq!(issue.message, "Invalid A-number format: 'A1234'. Expected 8-9 digits.");
        assert!(!report.is_valid());
    }

    #[test]
    fn test_future_birth_date_blocks() {
        let report = validator().validate(&extraction("questionnaire", &[("date_of_birth", "2999-01-01")]), today());
        assert!(rules(&report).contains(&"future_dob"));
        assert_eq!(report.blocking_count(), 1);
    }

    #[test]
    fn test_entry_before_birth_blocks() {
        let e = extraction(
            "questionnaire",
            &[("date_of_birth", "1990-05-01"), ("date_of_entry", "01/02/1985")],
        );
        let report = validator().validate(&e, today());
        assert!(rules(&report).contains(&"entry_before_birth"));
    }

    #[test]
    fn test_marriage_rules() {
        let young = extraction("questionnaire", &[("date_of_birth", "2000-01-01"), ("date_of_marriage", "2010-06-01")]);
        let report = validator().validate(&young, today());
        assert_eq!(report.by_rule("marriage_too_young").next().unwrap().severity, Severity::Advisory);

        let before = extraction("questionnaire", &[("date_of_birth", "2000-01-01"), ("date_of_marriage", "1999-06-01")]);
        assert!(rules(&validator().validate(&before, today())).contains(&"marriage_before_birth"));
    }

    #[test]
    fn test_date_format_advisory() {
        let e = extraction("passport", &[("expiration_date", "March 3rd 2030"), ("issue_date", "3/4/2020")]);
        let report = validator().validate(&e, today());
        let flagged: Vec<_> = report.by_rule("invalid_date_format").collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].field_key.as_deref(), Some("expiration_date"));
    }

    #[test]
    fn test_name_rules() {
        let e = extraction("questionnaire", &[("first_name", "MARIAJOSE"), ("last_name", "Li"), ("middle_name", "R2")]);
        let report = validator().validate(&e, today());
        let found = rules(&report);
        assert!(found.contains(&"name_all_caps"));
        assert!(found.contains(&"name_contains_numbers"));
        assert_eq!(report.by_rule("possible_name_swap").count(), 1);
        assert_eq!(
            report.by_rule("name_all_caps").next().unwrap().suggested_value.as_deref(),
            Some("Mariajose")
        );
    }

    #[test]
    fn test_required_fields_for_subtype() {
        let mut e = extraction("questionnaire", &[("first_name", "Ana")]);
        e.questionnaire_type = Some("questionnaire_i485".into());
        let report = validator().validate(&e, today());
        let missing: Vec<_> = report
            .by_rule("required_field_missing")
            .filter_map(|i| i.field_key.as_deref())
            .collect();
        assert_eq!(missing, vec!["last_name", "date_of_birth", "a_number"]);
    }

    #[test]
    fn test_confidence_family_history() {
        let mut e = extraction("questionnaire", &[]);
        e.fields.insert("city".into(), ExtractedField::new("Qeens", 0.42));
        e.family_members.push(FamilyExtraction {
            relationship: "child".into(),
            data: Attributes::new(),
            confidence: 0.5,
        });
        e.history.insert(
            "address".into(),
            vec![HistoryEntry {
                data: Attributes::new(),
                is_current: false,
                confidence: 0.4,
            }],
        );
        let report = validator().validate(&e, today());
        let low = report.by_rule(LOW_CONFIDENCE_RULE).next().unwrap();
        assert_eq!(low.message, "Low confidence (42%) on field 'city'");
        let found = rules(&report);
        for rule in [
            "family_member_no_name",
            "family_member_low_confidence",
            "empty_history_record",
            "history_low_confidence",
        ] {
            assert!(found.contains(&rule), "missing {rule}");
        }
        assert_eq!(
            report.by_rule("empty_history_record").next().unwrap().field_key.as_deref(),
            Some("history.address[0]")
        );
    }
}
