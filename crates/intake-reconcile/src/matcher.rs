//! Three-tier record matching
//!
//! ```text
//! identifier ──hit──► done (cache first, then live search)
//!     │ miss
//!     ▼
//! name + birth date ──hit──► 0.95
//!     │ miss
//!     ▼
//! name only ──hits──► 0.6 each
//! ```
//!
//! Store failures during a search are logged and treated as "no match";
//! the caller then proposes every field as NEW.

use crate::cache::IdentifierCache;
use crate::store::{Record, RecordStore, BIRTH_DATE_FIELD};
use intake_model::normalize::{digits_only, normalize_date};
use intake_model::schema::{DATE_OF_BIRTH, FIRST_NAME, IDENTIFIER, LAST_NAME};
use intake_model::{Attributes, Extraction, MatchMethod, RecordMatch};
use std::sync::Arc;

pub const IDENTIFIER_CONFIDENCE: f64 = 1.0;
pub const NAME_AND_BIRTH_DATE_CONFIDENCE: f64 = 0.95;
pub const NAME_ONLY_CONFIDENCE: f64 = 0.6;

/// Who to look for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonQuery {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub identifier: Option<String>,
}

impl PersonQuery {
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let get = |key: &str| extraction.value(key).map(str::to_string);
        Self {
            first_name: get(FIRST_NAME),
            last_name: get(LAST_NAME),
            date_of_birth: get(DATE_OF_BIRTH),
            identifier: get(IDENTIFIER),
        }
    }

    pub fn from_attributes(attributes: &Attributes) -> Self {
        let get = |key: &str| {
            attributes
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            first_name: get(FIRST_NAME),
            last_name: get(LAST_NAME),
            date_of_birth: get(DATE_OF_BIRTH),
            identifier: get(IDENTIFIER),
        }
    }

    /// "Last, First" when both are known.
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{last}, {first}")),
            _ => None,
        }
    }
}

/// A store record together with how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRecord {
    pub record: Record,
    pub method: MatchMethod,
    pub confidence: f64,
}

impl MatchedRecord {
    pub fn to_record_match(&self) -> RecordMatch {
        RecordMatch {
            record_id: self.record.id.clone(),
            display_name: self.record.display_name.clone(),
            method: self.method,
            confidence: self.confidence,
        }
    }
}

#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn RecordStore>,
    cache: Option<Arc<IdentifierCache>>,
}

impl Matcher {
    pub fn new(store: Arc<dyn RecordStore>, cache: Option<Arc<IdentifierCache>>) -> Self {
        Self { store, cache }
    }

    /// Matches from the first tier that produced any, best first.
    pub async fn find(&self, query: &PersonQuery) -> Vec<MatchedRecord> {
        if let Some(found) = self.by_identifier(query).await {
            return vec![found];
        }

        let (Some(first), Some(last)) = (&query.first_name, &query.last_name) else {
            return Vec::new();
        };
        let candidates = match self.store.search_records(first, last).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, first = %first, last = %last, "name search failed");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        if let Some(dob) = query.date_of_birth.as_deref().map(normalize_date) {
            let mut dated = Vec::new();
            for record in &candidates {
                if self.birth_date_of(record).await.as_deref() == Some(dob.as_str()) {
                    dated.push(MatchedRecord {
                        record: record.clone(),
                        method: MatchMethod::NameAndBirthDate,
                        confidence: NAME_AND_BIRTH_DATE_CONFIDENCE,
                    });
                }
            }
            if !dated.is_empty() {
                return dated;
            }
        }

        if candidates.len() > 1 {
            tracing::info!(count = candidates.len(), first = %first, last = %last, "ambiguous name-only match");
        }
        candidates
            .into_iter()
            .map(|record| MatchedRecord {
                record,
                method: MatchMethod::NameOnly,
                confidence: NAME_ONLY_CONFIDENCE,
            })
            .collect()
    }

    async fn by_identifier(&self, query: &PersonQuery) -> Option<MatchedRecord> {
        let digits = query.identifier.as_deref().map(digits_only).filter(|d| !d.is_empty())?;

        if let Some(record_id) = self.cache.as_ref().and_then(|c| c.lookup(&digits)) {
            match self.store.get_record(record_id).await {
                Ok(Some(record)) => {
                    tracing::debug!(record_id = %record.id, "identifier cache hit");
                    return Some(MatchedRecord {
                        record,
                        method: MatchMethod::IdentifierCache,
                        confidence: IDENTIFIER_CONFIDENCE,
                    });
                }
                Ok(None) => tracing::info!(record_id, "cached record id no longer resolves"),
                Err(e) => tracing::warn!(error = %e, record_id, "cached record lookup failed"),
            }
        }

        match self.store.search_by_identifier(&digits).await {
            Ok(Some(record)) => Some(MatchedRecord {
                record,
                method: MatchMethod::Identifier,
                confidence: IDENTIFIER_CONFIDENCE,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "identifier search failed");
                None
            }
        }
    }

    /// Birth date from the record, falling back to its biographic sub-record.
    async fn birth_date_of(&self, record: &Record) -> Option<String> {
        if let Some(date) = record.field(BIRTH_DATE_FIELD) {
            return Some(normalize_date(date));
        }
        match self.store.get_biographic(&record.id).await {
            Ok(bio) => bio.and_then(|b| b.field(BIRTH_DATE_FIELD).map(normalize_date)),
            Err(e) => {
                tracing::warn!(error = %e, record_id = %record.id, "biographic lookup failed");
                None
            }
        }
    }
}
