//! Validation findings. Produced by the rule engine, never raised as errors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Must be fixed before the extraction is considered valid.
    Blocking,
    /// Should be reviewed.
    Advisory,
    /// For information only.
    Informational,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Blocking => "BLOCKING",
            Severity::Advisory => "ADVISORY",
            Severity::Informational => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub field_key: Option<String>,
    pub current_value: Option<String>,
    pub suggested_value: Option<String>,
}

impl ValidationIssue {
    pub fn new(rule: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            message: message.into(),
            field_key: None,
            current_value: None,
            suggested_value: None,
        }
    }

    pub fn field(mut self, key: impl Into<String>) -> Self {
        self.field_key = Some(key.into());
        self
    }

    pub fn current(mut self, value: impl Into<String>) -> Self {
        self.current_value = Some(value.into());
        self
    }

    pub fn suggest(mut self, value: impl Into<String>) -> Self {
        self.suggested_value = Some(value.into());
        self
    }
}

/// One validation pass over one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn blocking_count(&self) -> usize {
        self.count(Severity::Blocking)
    }

    pub fn advisory_count(&self) -> usize {
        self.count(Severity::Advisory)
    }

    pub fn informational_count(&self) -> usize {
        self.count(Severity::Informational)
    }

    pub fn is_valid(&self) -> bool {
        self.blocking_count() == 0
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn by_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |i| i.rule == rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_only_counts_blocking() {
        let mut report = ValidationReport::default();
        report.push(ValidationIssue::new("low_confidence", Severity::Advisory, "low"));
        report.push(ValidationIssue::new("name_all_caps", Severity::Informational, "caps"));
        assert!(report.is_valid());

        report.push(ValidationIssue::new("future_dob", Severity::Blocking, "future").field("date_of_birth"));
        assert!(!report.is_valid());
        assert_eq!(report.blocking_count(), 1);
        assert_eq!(report.advisory_count(), 1);
        assert_eq!(report.informational_count(), 1);
    }
}
