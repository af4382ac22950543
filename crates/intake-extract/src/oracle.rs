//! Extraction Oracle interface
//!
//! The oracle is a vision-capable model: given page images and a prompt it
//! returns free text that should contain one JSON object. Everything that
//! talks to a model goes through [`ExtractionOracle`], so stages can be
//! exercised against [`ScriptedOracle`] without a network.

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use std::collections::VecDeque;

// ============================================================================
// Page images
// ============================================================================

/// One rendered page, as raw encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// `image/png`, `image/jpeg`, ...
    pub media_type: String,
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }
}

// ============================================================================
// Oracle trait
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Oracle not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Send `images` followed by `prompt`; return the reply text.
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError>;

    /// Model identifier, for logs and provenance.
    fn model(&self) -> &str;
}

// ============================================================================
// Scripted oracle
// ============================================================================

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<ScriptedReply>,
}

/// A prompt the scripted oracle received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub image_count: usize,
    pub max_tokens: u32,
}

/// Deterministic oracle for tests and dry runs.
///
/// Each rule answers prompts containing its needle; rules are checked in
/// the order they were added. Queued replies are consumed one per call and
/// the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    rules: Mutex<Vec<Rule>>,
    fallback: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, needle: &str, reply: ScriptedReply) -> Self {
        {
            let mut rules = self.rules.lock();
            match rules.iter_mut().find(|r| r.needle == needle) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    needle: needle.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    pub fn on(self, needle: &str, reply: impl Into<String>) -> Self {
        self.push(needle, ScriptedReply::Text(reply.into()))
    }

    pub fn fail_on(self, needle: &str, message: impl Into<String>) -> Self {
        self.push(needle, ScriptedReply::Fail(message.into()))
    }

    /// Reply used when no rule matches.
    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of recorded prompts containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.prompt.contains(needle)).count()
    }
}

#[async_trait]
impl ExtractionOracle for ScriptedOracle {
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        self.calls.lock().push(RecordedCall {
            prompt: prompt.to_string(),
            image_count: images.len(),
            max_tokens,
        });

        let reply = {
            let mut rules = self.rules.lock();
            rules.iter_mut().find(|r| prompt.contains(&r.needle)).and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            })
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(OracleError::Network(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| OracleError::InvalidResponse("no scripted reply for prompt".to_string())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
