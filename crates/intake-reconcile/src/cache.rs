//! Read-only identifier → record-id cache.
//!
//! Loaded once from a client metadata export of the form
//! `{"clients": {"A123456789": {"client_id": 42}, ...}}` and shared behind an
//! `Arc`. Keys compare digits-only, so `A-123-456-789` and `123456789` hit
//! the same entry.

use intake_model::normalize::digits_only;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid identifier cache: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default)]
pub struct IdentifierCache {
    entries: HashMap<String, String>,
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl IdentifierCache {
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let text = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cache = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), clients = cache.len(), "loaded identifier cache");
        Ok(cache)
    }

    /// Entries without a usable identifier or client id are skipped.
    pub fn from_json(text: &str) -> Result<Self, CacheError> {
        let root: Value = serde_json::from_str(text).map_err(|e| CacheError::Invalid(e.to_string()))?;
        let clients = match root.get("clients") {
            Some(Value::Object(map)) => map,
            Some(_) => return Err(CacheError::Invalid("\"clients\" is not an object".to_string())),
            None => return Ok(Self::default()),
        };
        let entries = clients
            .iter()
            .filter_map(|(identifier, entry)| {
                let digits = digits_only(identifier);
                let id = entry.get("client_id").and_then(id_text)?;
                (!digits.is_empty()).then_some((digits, id))
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        self.entries.get(&digits_only(identifier)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_formatting() {
        let cache = IdentifierCache::from_json(
            r#"{"clients": {
                "A-216-207-999": {"client_id": 1234},
                "A087654321": {"client_id": "77"},
                "A000000001": {"name": "no id"}
            }}"#,
        )
        .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("A216207999"), Some("1234"));
        assert_eq!(cache.lookup("087 654 321"), Some("77"));
        assert_eq!(cache.lookup("A000000001"), None);
    }

    #[test]
    fn test_missing_clients_is_empty() {
        assert!(IdentifierCache::from_json("{}").unwrap().is_empty());
        assert!(IdentifierCache::from_json(r#"{"clients": []}"#).is_err());
    }
}
