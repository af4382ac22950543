//! HTTP/JSON Record Store client.
//!
//! Resource layout under the configured base URL:
//!
//! ```text
//! GET   /health
//! GET   /records/{id}                 GET  /records?first_name=..&last_name=..
//! GET   /records?identifier=..        POST /records
//! PATCH /records/{id}                 GET  /records/{id}/biographic
//! POST  /records/{id}/biographic      PATCH /biographics/{id}
//! POST  /records/{id}/relatives       POST /records/{id}/history/{kind}
//! POST  /records/{id}/notes
//! ```
//!
//! Requests carry `Authorization: Bearer <key>`. A 404 on a lookup is "absent",
//! not an error.

use crate::store::{Biographic, LinkMetadata, Note, Record, RecordStore, StoreError, StoreFields};
use async_trait::async_trait;
use intake_model::StructuredKind;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

pub const STORE_URL_ENV: &str = "INTAKE_STORE_URL";
pub const STORE_API_KEY_ENV: &str = "INTAKE_STORE_API_KEY";
pub const STORE_STRUCTURED_ENV: &str = "INTAKE_STORE_STRUCTURED";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// History kinds the store accepts as structured records.
    pub structured: BTreeSet<StructuredKind>,
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn all_kinds() -> BTreeSet<StructuredKind> {
    [
        StructuredKind::Address,
        StructuredKind::Employment,
        StructuredKind::Education,
        StructuredKind::Travel,
    ]
    .into_iter()
    .collect()
}

impl HttpStoreConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            structured: all_kinds(),
        }
    }

    /// `INTAKE_STORE_URL` is required. `INTAKE_STORE_STRUCTURED` is a comma
    /// list of history kinds (`none` disables structured records).
    pub fn from_env() -> Result<Self, StoreError> {
        let base_url = non_empty_env(STORE_URL_ENV)
            .ok_or_else(|| StoreError::NotConfigured(format!("{STORE_URL_ENV} is not set")))?;
        let mut config = Self::new(&base_url);
        config.api_key = non_empty_env(STORE_API_KEY_ENV);
        if let Some(list) = non_empty_env(STORE_STRUCTURED_ENV) {
            config.structured = parse_kinds(&list)?;
        }
        Ok(config)
    }
}

fn parse_kinds(list: &str) -> Result<BTreeSet<StructuredKind>, StoreError> {
    if list.trim().eq_ignore_ascii_case("none") {
        return Ok(BTreeSet::new());
    }
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            StructuredKind::parse(s)
                .ok_or_else(|| StoreError::NotConfigured(format!("{STORE_STRUCTURED_ENV}: unknown history kind '{s}'")))
        })
        .collect()
}

fn normalize_http_base_url(base_url: &str) -> String {
    let mut host = base_url.trim().to_string();
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    host.trim_end_matches('/').to_string()
}

async fn check_status(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(response.url().path().to_string()));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(StoreError::Api {
            status: status.as_u16(),
            message,
        });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let text = response
        .text()
        .await
        .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

/// `{"id": "..."}` or `{"id": 42}`.
fn created_id(value: &Value) -> Result<String, StoreError> {
    match value.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::InvalidResponse("create response has no id".to_string())),
    }
}

/// 404 → `None`.
fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct HttpRecordStore {
    client: Client,
    base: Url,
    api_key: Option<String>,
    structured: BTreeSet<StructuredKind>,
}

impl HttpRecordStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&normalize_http_base_url(&config.base_url))
            .map_err(|e| StoreError::NotConfigured(format!("invalid store URL '{}': {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::NotConfigured(format!("store URL '{base}' cannot be a base")));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::NotConfigured(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            api_key: config.api_key,
            structured: config.structured,
        })
    }

    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(HttpStoreConfig::from_env()?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::NotConfigured(format!("store URL '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, StoreError> {
        let mut builder = self.client.request(method, self.endpoint(segments)?);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, StoreError> {
        let response = builder.send().await.map_err(|e| StoreError::Network(e.to_string()))?;
        check_status(response).await
    }

    /// Startup health check so an unreachable store fails before any document runs.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        self.send(self.request(Method::GET, &["health"])?).await.map(|_| ())
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let value = optional(self.send(self.request(Method::GET, &["records", id])?).await)?;
        value.map(decode).transpose()
    }

    async fn search_records(&self, first_name: &str, last_name: &str) -> Result<Vec<Record>, StoreError> {
        let request = self
            .request(Method::GET, &["records"])?
            .query(&[("first_name", first_name), ("last_name", last_name)]);
        decode(self.send(request).await?)
    }

    async fn search_by_identifier(&self, identifier: &str) -> Result<Option<Record>, StoreError> {
        let request = self.request(Method::GET, &["records"])?.query(&[("identifier", identifier)]);
        let records: Vec<Record> = decode(self.send(request).await?)?;
        if records.len() > 1 {
            tracing::warn!(count = records.len(), "identifier search returned several records; using the first");
        }
        Ok(records.into_iter().next())
    }

    async fn get_biographic(&self, record_id: &str) -> Result<Option<Biographic>, StoreError> {
        let value = optional(
            self.send(self.request(Method::GET, &["records", record_id, "biographic"])?)
                .await,
        )?;
        value.map(decode).transpose()
    }

    async fn create_record(&self, first_name: &str, last_name: &str, fields: &StoreFields) -> Result<String, StoreError> {
        let body = json!({"first_name": first_name, "last_name": last_name, "fields": fields});
        let value = self.send(self.request(Method::POST, &["records"])?.json(&body)).await?;
        created_id(&value)
    }

    async fn update_record(&self, id: &str, fields: &StoreFields) -> Result<(), StoreError> {
        let body = json!({ "fields": fields });
        self.send(self.request(Method::PATCH, &["records", id])?.json(&body))
            .await
            .map(|_| ())
    }

    async fn create_biographic(&self, record_id: &str, fields: &StoreFields) -> Result<String, StoreError> {
        let body = json!({ "fields": fields });
        let value = self
            .send(self.request(Method::POST, &["records", record_id, "biographic"])?.json(&body))
            .await?;
        created_id(&value)
    }

    async fn update_biographic(&self, biographic_id: &str, fields: &StoreFields) -> Result<(), StoreError> {
        let body = json!({ "fields": fields });
        self.send(self.request(Method::PATCH, &["biographics", biographic_id])?.json(&body))
            .await
            .map(|_| ())
    }

    async fn link_relative(
        &self,
        primary_id: &str,
        related_id: &str,
        relationship: &str,
        metadata: &LinkMetadata,
    ) -> Result<(), StoreError> {
        let body = json!({"related_id": related_id, "relationship": relationship, "metadata": metadata});
        self.send(self.request(Method::POST, &["records", primary_id, "relatives"])?.json(&body))
            .await
            .map(|_| ())
    }

    async fn create_history_record(
        &self,
        record_id: &str,
        kind: StructuredKind,
        fields: &StoreFields,
    ) -> Result<String, StoreError> {
        if !self.supports_structured(kind) {
            return Err(StoreError::Unsupported(format!("{} records", kind.as_str())));
        }
        let body = json!({ "fields": fields });
        let value = self
            .send(
                self.request(Method::POST, &["records", record_id, "history", kind.as_str()])?
                    .json(&body),
            )
            .await?;
        created_id(&value)
    }

    async fn create_note(&self, record_id: &str, note: &Note) -> Result<String, StoreError> {
        let value = self
            .send(self.request(Method::POST, &["records", record_id, "notes"])?.json(note))
            .await?;
        created_id(&value)
    }

    fn supports_structured(&self, kind: StructuredKind) -> bool {
        self.structured.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let store = HttpRecordStore::new(HttpStoreConfig::new("crm.example.com/api/")).unwrap();
        assert_eq!(store.base_url().as_str(), "https://crm.example.com/api");
        let url = store.endpoint(&["records", "A 1/2"]).unwrap();
        assert_eq!(url.as_str(), "https://crm.example.com/api/records/A%201%2F2");
    }

    #[test]
    fn test_parse_kinds() {
        let kinds = parse_kinds("address, travel").unwrap();
        assert!(kinds.contains(&StructuredKind::Travel));
        assert!(!kinds.contains(&StructuredKind::Education));
        assert!(parse_kinds("none").unwrap().is_empty());
        assert!(parse_kinds("address,pets").is_err());
    }

    #[test]
    fn test_created_id_forms() {
        assert_eq!(created_id(&json!({"id": 42})).unwrap(), "42");
        assert_eq!(created_id(&json!({"id": "rec-9"})).unwrap(), "rec-9");
        assert!(created_id(&json!({})).is_err());
    }
}
