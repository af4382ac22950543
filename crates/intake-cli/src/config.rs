//! Runtime configuration, resolved once before any document is touched.
//!
//! Every constructor here fails fast: a missing API key, a bad tunable or an
//! unreachable Record Store stops the command before the first document.

use anyhow::{anyhow, Context, Result};
use intake_extract::config::env_fraction;
use intake_extract::{ExtractionOracle, PipelineConfig, ScriptedOracle, Strategy, UnifiedOracle};
use intake_reconcile::{
    DiffConfig, HttpRecordStore, IdentifierCache, InMemoryRecordStore, RecordStore,
    DEFAULT_FAMILY_MATCH_THRESHOLD,
};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const FAMILY_MATCH_THRESHOLD_ENV: &str = "INTAKE_FAMILY_MATCH_THRESHOLD";
pub const IDENTIFIER_CACHE_ENV: &str = "INTAKE_IDENTIFIER_CACHE";

// ============================================================================
// Oracle
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplayRule {
    contains: String,
    reply: Value,
}

/// Canned replies keyed by a phrase the prompt must contain.
#[derive(Debug, Deserialize)]
struct ReplayScript {
    #[serde(default)]
    rules: Vec<ReplayRule>,
    #[serde(default)]
    otherwise: Option<Value>,
}

fn reply_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Deterministic oracle for demos and offline runs.
pub fn replay_oracle(path: &Path) -> Result<ScriptedOracle> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading replay script {}", path.display()))?;
    let script: ReplayScript =
        serde_json::from_str(&text).with_context(|| format!("parsing replay script {}", path.display()))?;
    let mut oracle = ScriptedOracle::new();
    for rule in script.rules {
        oracle = oracle.on(&rule.contains, reply_text(rule.reply));
    }
    if let Some(otherwise) = script.otherwise {
        oracle = oracle.otherwise(reply_text(otherwise));
    }
    Ok(oracle)
}

pub fn oracle(replay: Option<&Path>) -> Result<Arc<dyn ExtractionOracle>> {
    match replay {
        Some(path) => {
            tracing::info!(script = %path.display(), "using replay oracle");
            Ok(Arc::new(replay_oracle(path)?))
        }
        None => {
            let oracle = UnifiedOracle::from_env()?;
            tracing::info!(model = oracle.model(), "oracle configured");
            Ok(Arc::new(oracle))
        }
    }
}

// ============================================================================
// Pipeline and diff tunables
// ============================================================================

pub fn pipeline_config(basic: bool, strategies: &[String]) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if basic {
        let base = PipelineConfig::basic();
        config.mode = base.mode;
        config.strategies = base.strategies;
    }
    if !strategies.is_empty() {
        config.strategies = strategies
            .iter()
            .map(|s| s.parse::<Strategy>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>>>()?;
    }
    Ok(config)
}

pub fn diff_config() -> Result<DiffConfig> {
    Ok(DiffConfig {
        family_match_threshold: env_fraction(FAMILY_MATCH_THRESHOLD_ENV, DEFAULT_FAMILY_MATCH_THRESHOLD)?,
    })
}

/// Flag first, then `INTAKE_IDENTIFIER_CACHE`; neither means no cache.
pub fn identifier_cache(flag: Option<&Path>) -> Result<Option<Arc<IdentifierCache>>> {
    let path = flag.map(Path::to_path_buf).or_else(|| {
        std::env::var(IDENTIFIER_CACHE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    });
    match path {
        Some(path) => Ok(Some(Arc::new(IdentifierCache::load(&path)?))),
        None => Ok(None),
    }
}

// ============================================================================
// Record Store
// ============================================================================

pub enum StoreBackend {
    Http(Arc<HttpRecordStore>),
    Memory {
        store: Arc<InMemoryRecordStore>,
        fixture: Option<PathBuf>,
    },
}

impl StoreBackend {
    /// `--offline` uses the in-memory store, seeded from `fixture` when given.
    /// Otherwise the HTTP store must be configured and answer its health check.
    pub async fn connect(offline: bool, fixture: Option<&Path>) -> Result<Self> {
        if offline {
            let store = match fixture {
                Some(path) => InMemoryRecordStore::load(path)?,
                None => InMemoryRecordStore::new(),
            };
            return Ok(Self::Memory {
                store: Arc::new(store),
                fixture: fixture.map(Path::to_path_buf),
            });
        }
        if fixture.is_some() {
            return Err(anyhow!("--fixture requires --offline"));
        }
        let store = HttpRecordStore::from_env()?;
        store
            .check_connection()
            .await
            .with_context(|| format!("record store at {} is unreachable", store.base_url()))?;
        tracing::info!(url = %store.base_url(), "record store connected");
        Ok(Self::Http(Arc::new(store)))
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        match self {
            Self::Http(store) => store.clone(),
            Self::Memory { store, .. } => store.clone(),
        }
    }

    /// Write the in-memory state back to its fixture file.
    pub fn save_fixture(&self) -> Result<Option<PathBuf>> {
        let Self::Memory {
            store,
            fixture: Some(path),
        } = self
        else {
            return Ok(None);
        };
        let json = serde_json::to_string_pretty(&store.snapshot())?;
        std::fs::write(path, json).with_context(|| format!("writing fixture {}", path.display()))?;
        Ok(Some(path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_script_accepts_objects_and_strings() {
        use intake_extract::PageImage;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.json");
        std::fs::write(
            &path,
            r#"{"rules": [{"contains": "alpha", "reply": {"confidence": 0.5}}], "otherwise": "plain"}"#,
        )
        .unwrap();
        let oracle = replay_oracle(&path).unwrap();
        let images: Vec<PageImage> = Vec::new();
        assert_eq!(oracle.complete(&images, "say alpha", 10).await.unwrap(), r#"{"confidence":0.5}"#);
        assert_eq!(oracle.complete(&images, "other", 10).await.unwrap(), "plain");
    }

    #[test]
    fn test_strategy_flags_override() {
        let config = pipeline_config(false, &["section".to_string(), "direct".to_string()]).unwrap();
        assert_eq!(config.strategies, vec![Strategy::SectionBySection, Strategy::DirectSchema]);
        assert!(pipeline_config(false, &["guess".to_string()]).is_err());
        assert_eq!(pipeline_config(true, &[]).unwrap().strategies, vec![Strategy::DirectSchema]);
    }
}
