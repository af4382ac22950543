//! Consensus across strategy outputs.
//!
//! - fields: highest confidence per key, first seen on ties
//! - family: union, deduplicated on (relationship, first name, last name)
//! - history: union without dedup
//! - confidence: mean of per-strategy confidences (failed strategies count 0)

use intake_model::Extraction;
use std::collections::HashSet;

pub fn build_consensus(results: &[Extraction]) -> Extraction {
    match results {
        [] => Extraction::empty(),
        [only] => only.clone(),
        _ => merge(results),
    }
}

fn merge(results: &[Extraction]) -> Extraction {
    let mut consensus = Extraction::empty();

    for result in results {
        for (key, field) in &result.fields {
            match consensus.fields.get(key) {
                Some(best) if best.confidence >= field.confidence => {}
                _ => {
                    consensus.fields.insert(key.clone(), field.clone());
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for result in results {
        for member in &result.family_members {
            if seen.insert(member.identity()) {
                consensus.family_members.push(member.clone());
            }
        }
    }

    for result in results {
        for (history_type, entries) in &result.history {
            consensus
                .history
                .entry(history_type.clone())
                .or_default()
                .extend(entries.iter().cloned());
        }
        for (key, value) in &result.other {
            if key != "raw_response" {
                consensus.other.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    consensus.confidence = results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;
    consensus
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use intake_model::{Attributes, ExtractedField, FamilyExtraction, HistoryEntry};

    fn with_field(key: &str, value: &str, confidence: f64, overall: f64) -> Extraction {
        let mut e = Extraction::empty();
        e.confidence = overall;
        e.fields.insert(key.into(), ExtractedField::new(value, confidence));
        e
    }

    fn member(relationship: &str, first: &str, last: &str) -> FamilyExtraction {
        let mut data = Attributes::new();
        data.insert("first_name".into(), first.into());
        data.insert("last_name".into(), last.into());
        FamilyExtraction {
            relationship: relationship.into(),
            data,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_highest_confidence_wins_ties_first() {
        let a = with_field("last_name", "Lopes", 0.6, 0.8);
        let b = with_field("last_name", "Lopez", 0.9, 0.9);
        let c = with_field("last_name", "Lopec", 0.9, 0.7);
        let consensus = build_consensus(&[a, b, c]);
        assert_eq!(consensus.value("last_name"), Some("Lopez"));
        assert_relative_eq!(consensus.confidence, (0.8 + 0.9 + 0.7) / 3.0);
    }

    #[test]
    fn test_family_dedup_history_union() {
        let mut a = Extraction::empty();
        a.family_members = vec![member("spouse", "Jose", "Lopez"), member("child", "Lia", "Lopez")];
        a.history.insert(
            "address".into(),
            vec![HistoryEntry {
                data: Attributes::new(),
                is_current: true,
                confidence: 0.9,
            }],
        );
        let mut b = a.clone();
        b.family_members.push(member("child", "Ana", "Lopez"));

        let consensus = build_consensus(&[a, b]);
        assert_eq!(consensus.family_members.len(), 3);
        assert_eq!(consensus.history["address"].len(), 2);
    }

    #[test]
    fn test_failed_strategy_drags_confidence() {
        let good = with_field("first_name", "Ana", 0.9, 0.9);
        let consensus = build_consensus(&[good, Extraction::empty()]);
        assert_eq!(consensus.value("first_name"), Some("Ana"));
        assert_relative_eq!(consensus.confidence, 0.45);
        assert_eq!(build_consensus(&[]).confidence, 0.0);
    }
}
