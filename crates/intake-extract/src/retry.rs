//! Confidence-gated retry of individual fields.
//!
//! Which fields get another look comes from the validator's
//! `low_confidence` findings, not from a second threshold check here.

use crate::oracle::{ExtractionOracle, PageImage};
use crate::validator::LOW_CONFIDENCE_RULE;
use crate::{prompts, reply};
use intake_model::{ExtractedField, Extraction, ValidationReport};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryOutcome {
    pub requested: Vec<String>,
    pub improved: Vec<String>,
}

/// Up to `max_fields` keys flagged low-confidence, lowest confidence first.
pub fn select_fields(report: &ValidationReport, extraction: &Extraction, max_fields: usize) -> Vec<String> {
    let unique: BTreeMap<&str, f64> = report
        .by_rule(LOW_CONFIDENCE_RULE)
        .filter_map(|issue| issue.field_key.as_deref())
        .filter_map(|key| extraction.fields.get(key).map(|f| (key, f.confidence)))
        .collect();
    let mut flagged: Vec<(&str, f64)> = unique.into_iter().collect();
    flagged.sort_by(|a, b| a.1.total_cmp(&b.1));
    flagged.into_iter().take(max_fields).map(|(k, _)| k.to_string()).collect()
}

/// Re-query exactly `keys`. A returned field replaces the stored one only if
/// its confidence is strictly greater; unrequested keys are ignored.
pub async fn retry_fields(
    oracle: &dyn ExtractionOracle,
    images: &[PageImage],
    extraction: &mut Extraction,
    keys: &[String],
    max_tokens: u32,
) -> RetryOutcome {
    let mut outcome = RetryOutcome {
        requested: keys.to_vec(),
        improved: Vec::new(),
    };
    let targets: Vec<(&str, &ExtractedField)> = keys
        .iter()
        .filter_map(|k| extraction.fields.get(k).map(|f| (k.as_str(), f)))
        .collect();
    if targets.is_empty() {
        return outcome;
    }

    let prompt = prompts::retry(&targets);
    let retried = match oracle.complete(images, &prompt, max_tokens).await {
        Ok(text) => reply::parse_extraction_lenient(&text, "retry"),
        Err(e) => {
            tracing::warn!(error = %e, "retry call failed");
            return outcome;
        }
    };

    for (key, candidate) in retried.fields {
        if !keys.contains(&key) {
            continue;
        }
        let improves = extraction
            .fields
            .get(&key)
            .map(|current| candidate.confidence > current.confidence)
            .unwrap_or(false);
        if improves {
            extraction.fields.insert(key.clone(), candidate);
            outcome.improved.push(key);
        }
    }

    tracing::info!(
        improved = outcome.improved.len(),
        requested = outcome.requested.len(),
        "low-confidence retry finished"
    );
    outcome
}
