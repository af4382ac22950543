//! History sets rendered as a single human-readable note.

use crate::store::Note;
use intake_model::normalize::{parse_date_with, DIFF_DATE_FORMATS};
use intake_model::{HistoryRecord, HistoryType};
use std::cmp::Ordering;

pub const NOTE_CATEGORY: &str = "Intake";

fn start_date(record: &HistoryRecord, start_key: &str) -> Option<chrono::NaiveDate> {
    record
        .final_data()
        .get(start_key)
        .and_then(|v| parse_date_with(v, DIFF_DATE_FORMATS))
}

/// Current entries first, then newest start date first; undated entries last.
pub fn ordered<'a>(records: &'a [HistoryRecord], start_key: &str) -> Vec<&'a HistoryRecord> {
    let mut sorted: Vec<&HistoryRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        b.is_current.cmp(&a.is_current).then_with(|| {
            match (start_date(a, start_key), start_date(b, start_key)) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
    });
    sorted
}

/// `history_type` is `None` for types the registry does not describe; the
/// raw key then stands in for labels.
pub fn history_note(type_key: &str, history_type: Option<&HistoryType>, records: &[HistoryRecord]) -> Note {
    let display = history_type
        .map(|h| h.display_name.clone())
        .unwrap_or_else(|| type_key.replace('_', " "));
    let start_key = history_type.map(|h| h.start_key.as_str()).unwrap_or("from_date");
    let end_key = history_type.map(|h| h.end_key.as_str()).unwrap_or("to_date");

    let mut body = String::new();
    for (n, record) in ordered(records, start_key).into_iter().enumerate() {
        let data = record.final_data();
        let from = data.get(start_key).map(String::as_str).unwrap_or("?");
        let to = if record.is_current {
            "present"
        } else {
            data.get(end_key).map(String::as_str).unwrap_or("?")
        };
        body.push_str(&format!("{}. {} to {}", n + 1, from, to));
        if record.is_current {
            body.push_str(" (current)");
        }
        body.push('\n');

        // Schema order for known fields, then anything else alphabetically.
        let mut lines: Vec<(String, &str)> = Vec::new();
        if let Some(h) = history_type {
            for field in &h.fields {
                if field.key == start_key || field.key == end_key {
                    continue;
                }
                if let Some(v) = data.get(&field.key).filter(|v| !v.trim().is_empty()) {
                    lines.push((field.label.clone(), v.as_str()));
                }
            }
        }
        for (key, value) in &data {
            let known = key == start_key
                || key == end_key
                || history_type.is_some_and(|h| h.fields.iter().any(|f| &f.key == key));
            if !known && !value.trim().is_empty() {
                lines.push((key.clone(), value.as_str()));
            }
        }
        for (label, value) in lines {
            body.push_str(&format!("   {label}: {}\n", value.trim()));
        }
    }

    Note {
        subject: format!("{display} (from intake document)"),
        body,
        category: NOTE_CATEGORY.to_string(),
    }
}
