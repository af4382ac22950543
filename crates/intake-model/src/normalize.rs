//! Type-aware value normalization for diffing.
//!
//! Every function here is idempotent: normalizing an already-normalized
//! value returns it unchanged.

use crate::schema::ValueType;
use chrono::NaiveDate;

/// Input formats tried in order when canonicalizing a date for comparison.
pub const DIFF_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Canonical output format for dates.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

pub fn normalize(value: &str, value_type: ValueType) -> String {
    match value_type {
        ValueType::Date => normalize_date(value),
        ValueType::Phone | ValueType::Identifier => digits_only(value),
        ValueType::Text | ValueType::Name | ValueType::Email => normalize_text(value),
    }
}

/// Parse with the first matching format from `formats`.
pub fn parse_date_with(value: &str, formats: &[&str]) -> Option<NaiveDate> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// `YYYY-MM-DD` when the value parses, otherwise the trimmed text.
pub fn normalize_date(value: &str) -> String {
    match parse_date_with(value, DIFF_DATE_FORMATS) {
        Some(date) => date.format(CANONICAL_DATE_FORMAT).to_string(),
        None => normalize_text(value),
    }
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Trimmed, whitespace runs collapsed, lowercased.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Title-case each whitespace-separated word ("MARIA JOSE" → "Maria Jose").
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_formats_canonicalize() {
        assert_eq!(normalize_date("1990-01-15"), "1990-01-15");
        assert_eq!(normalize_date("01/15/1990"), "1990-01-15");
        assert_eq!(normalize_date("1990/01/15"), "1990-01-15");
        // Month-first wins for ambiguous input.
        assert_eq!(normalize_date("02/03/1990"), "1990-02-03");
        // Day-first picked up when month-first is impossible.
        assert_eq!(normalize_date("25/12/1990"), "1990-12-25");
    }

    #[test]
    fn test_unparseable_date_falls_back_to_text() {
        assert_eq!(normalize_date("  Spring   1990 "), "spring 1990");
    }

    #[test]
    fn test_phone_and_identifier_digits() {
        assert_eq!(normalize("(212) 555-0100", ValueType::Phone), "2125550100");
        assert_eq!(normalize("A 123-456-789", ValueType::Identifier), "123456789");
    }

    #[test]
    fn test_text_case_insensitive() {
        assert_eq!(normalize("  New   York ", ValueType::Text), "new york");
        assert_eq!(normalize("GARCIA", ValueType::Name), normalize("garcia", ValueType::Name));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("MARIA JOSE"), "Maria Jose");
        assert_eq!(title_case("o'NEIL"), "O'neil");
    }
}
