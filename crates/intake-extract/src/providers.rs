//! Vision model providers
//!
//! HTTP clients for the Anthropic Messages API and OpenAI-compatible chat
//! completions. Both send every page as an image part followed by the prompt
//! text, with temperature 0.

use crate::config::{env_usize, ConfigError};
use crate::oracle::{ExtractionOracle, OracleError, PageImage};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const ANTHROPIC_MODEL_ENV: &str = "INTAKE_ANTHROPIC_MODEL";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV: &str = "INTAKE_OPENAI_MODEL";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const TIMEOUT_ENV: &str = "INTAKE_LLM_TIMEOUT_SECS";

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_TIMEOUT_SECS: usize = 120;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OracleConfig {
    /// Anthropic wins when both keys are present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs = env_usize(TIMEOUT_ENV, DEFAULT_TIMEOUT_SECS, 5, 900)? as u64;

        if let Some(key) = non_empty_env(ANTHROPIC_API_KEY_ENV) {
            let mut config = Self::anthropic(&key, &env_or(ANTHROPIC_MODEL_ENV, DEFAULT_ANTHROPIC_MODEL));
            config.base_url = normalize_http_base_url(
                &env_or(ANTHROPIC_BASE_URL_ENV, DEFAULT_ANTHROPIC_BASE_URL),
                DEFAULT_ANTHROPIC_BASE_URL,
            );
            config.timeout_secs = timeout_secs;
            return Ok(config);
        }

        if let Some(key) = non_empty_env(OPENAI_API_KEY_ENV) {
            let mut config = Self::openai(&key, &env_or(OPENAI_MODEL_ENV, DEFAULT_OPENAI_MODEL));
            config.base_url = normalize_http_base_url(
                &env_or(OPENAI_BASE_URL_ENV, DEFAULT_OPENAI_BASE_URL),
                DEFAULT_OPENAI_BASE_URL,
            );
            config.timeout_secs = timeout_secs;
            return Ok(config);
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS as u64,
        }
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS as u64,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    non_empty_env(name).unwrap_or_else(|| default.to_string())
}

fn normalize_http_base_url(base_url: &str, default: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    host.trim_end_matches('/').to_string()
}

fn build_http_client(timeout_secs: u64) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))
}

async fn check_status(response: reqwest::Response) -> Result<serde_json::Value, OracleError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(OracleError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(OracleError::Api {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json()
        .await
        .map_err(|e| OracleError::InvalidResponse(e.to_string()))
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct AnthropicOracle {
    client: Client,
    config: OracleConfig,
}

impl AnthropicOracle {
    pub fn new(config: OracleConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_http_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl ExtractionOracle for AnthropicOracle {
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        let mut content: Vec<serde_json::Value> = images
            .iter()
            .map(|image| {
                serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.media_type,
                        "data": image.base64(),
                    }
                })
            })
            .collect();
        content.push(serde_json::json!({"type": "text", "text": prompt}));

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": 0.0,
            "messages": [{"role": "user", "content": content}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let data = check_status(response).await?;
        let text: String = data["content"]
            .as_array()
            .ok_or_else(|| OracleError::InvalidResponse("missing content blocks".to_string()))?
            .iter()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!(
            model = %self.config.model,
            input_tokens = data["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens = data["usage"]["output_tokens"].as_u64().unwrap_or(0),
            "anthropic completion"
        );
        Ok(text.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

pub struct OpenAIOracle {
    client: Client,
    config: OracleConfig,
}

impl OpenAIOracle {
    pub fn new(config: OracleConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_http_client(config.timeout_secs)?,
            config,
        })
    }
}

#[async_trait]
impl ExtractionOracle for OpenAIOracle {
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        let mut content: Vec<serde_json::Value> = images
            .iter()
            .map(|image| serde_json::json!({"type": "image_url", "image_url": {"url": image.data_url()}}))
            .collect();
        content.push(serde_json::json!({"type": "text", "text": prompt}));

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": 0.0,
            "messages": [{"role": "user", "content": content}],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let data = check_status(response).await?;
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::InvalidResponse("missing choices[0].message.content".to_string()))?;

        tracing::debug!(
            model = %self.config.model,
            prompt_tokens = data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens = data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            "openai completion"
        );
        Ok(text.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Unified
// ============================================================================

/// Dispatches to whichever provider the configuration selected.
pub enum UnifiedOracle {
    Anthropic(AnthropicOracle),
    OpenAI(OpenAIOracle),
}

impl UnifiedOracle {
    pub fn from_config(config: OracleConfig) -> Result<Self, ConfigError> {
        Ok(match config.provider {
            Provider::Anthropic => Self::Anthropic(AnthropicOracle::new(config)?),
            Provider::OpenAI => Self::OpenAI(OpenAIOracle::new(config)?),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(OracleConfig::from_env()?)
    }
}

#[async_trait]
impl ExtractionOracle for UnifiedOracle {
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        match self {
            Self::Anthropic(o) => o.complete(images, prompt, max_tokens).await,
            Self::OpenAI(o) => o.complete(images, prompt, max_tokens).await,
        }
    }

    fn model(&self) -> &str {
        match self {
            Self::Anthropic(o) => o.model(),
            Self::OpenAI(o) => o.model(),
        }
    }
}
