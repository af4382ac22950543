//! Record Store interface
//!
//! The external contact-management system, seen through the handful of
//! operations intake needs. Field maps are keyed by the store's own field
//! names (`FirstName`, `BirthDate`, ...), as listed in the schema registry.

use async_trait::async_trait;
use intake_model::{Attributes, StructuredKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store field name → value.
pub type StoreFields = BTreeMap<String, String>;

pub const FIRST_NAME_FIELD: &str = "FirstName";
pub const MIDDLE_NAME_FIELD: &str = "MiddleName";
pub const LAST_NAME_FIELD: &str = "LastName";
pub const BIRTH_DATE_FIELD: &str = "BirthDate";
pub const IDENTIFIER_FIELD: &str = "AlienNumber";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Record store API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Record store not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub fields: StoreFields,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// The biographic sub-record hanging off a primary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biographic {
    pub id: String,
    pub record_id: String,
    #[serde(default)]
    pub fields: StoreFields,
}

impl Biographic {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Extra facts attached to a relative link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marriage_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marriage_place: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resides_with_client: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accompanying: Option<bool>,
}

fn flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

impl LinkMetadata {
    /// Read from a family member's final attributes.
    pub fn from_attributes(attributes: &Attributes) -> Self {
        let text = |key: &str| {
            attributes
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            marriage_date: text("date_of_marriage"),
            marriage_place: text("place_of_marriage"),
            resides_with_client: attributes.get("resides_with_client").and_then(|v| flag(v)),
            accompanying: attributes.get("accompanying").and_then(|v| flag(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub subject: String,
    pub body: String,
    pub category: String,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Case-insensitive exact name search.
    async fn search_records(&self, first_name: &str, last_name: &str) -> Result<Vec<Record>, StoreError>;

    /// `identifier` is digits only.
    async fn search_by_identifier(&self, identifier: &str) -> Result<Option<Record>, StoreError>;

    async fn get_biographic(&self, record_id: &str) -> Result<Option<Biographic>, StoreError>;

    /// Returns the new record id.
    async fn create_record(&self, first_name: &str, last_name: &str, fields: &StoreFields) -> Result<String, StoreError>;

    async fn update_record(&self, id: &str, fields: &StoreFields) -> Result<(), StoreError>;

    /// Returns the new biographic id.
    async fn create_biographic(&self, record_id: &str, fields: &StoreFields) -> Result<String, StoreError>;

    async fn update_biographic(&self, biographic_id: &str, fields: &StoreFields) -> Result<(), StoreError>;

    async fn link_relative(
        &self,
        primary_id: &str,
        related_id: &str,
        relationship: &str,
        metadata: &LinkMetadata,
    ) -> Result<(), StoreError>;

    async fn create_history_record(
        &self,
        record_id: &str,
        kind: StructuredKind,
        fields: &StoreFields,
    ) -> Result<String, StoreError>;

    async fn create_note(&self, record_id: &str, note: &Note) -> Result<String, StoreError>;

    /// Whether structured records of `kind` can be stored; otherwise history
    /// of that kind is written as a note.
    fn supports_structured(&self, kind: StructuredKind) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_metadata_from_attributes() {
        let mut attrs = Attributes::new();
        attrs.insert("date_of_marriage".into(), "2010-06-12".into());
        attrs.insert("place_of_marriage".into(), "  ".into());
        attrs.insert("accompanying".into(), "Yes".into());
        attrs.insert("resides_with_client".into(), "unknown".into());

        let meta = LinkMetadata::from_attributes(&attrs);
        assert_eq!(meta.marriage_date.as_deref(), Some("2010-06-12"));
        assert_eq!(meta.marriage_place, None);
        assert_eq!(meta.accompanying, Some(true));
        assert_eq!(meta.resides_with_client, None);
    }
}
