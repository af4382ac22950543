//! Pipeline tunables and environment helpers.

use crate::strategy::Strategy;

pub const CONFIDENCE_FLOOR_ENV: &str = "INTAKE_CONFIDENCE_FLOOR";
pub const MIN_CONFIDENCE_ENV: &str = "INTAKE_MIN_CONFIDENCE";
pub const MAX_ITERATIONS_ENV: &str = "INTAKE_MAX_ITERATIONS";
pub const MAX_RETRY_FIELDS_ENV: &str = "INTAKE_MAX_RETRY_FIELDS";
pub const MAX_TOKENS_ENV: &str = "INTAKE_LLM_MAX_TOKENS";

const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.7;
const DEFAULT_MIN_CONFIDENCE: f64 = 0.8;
const DEFAULT_MAX_ITERATIONS: usize = 3;
const DEFAULT_MAX_RETRY_FIELDS: usize = 5;
const DEFAULT_MAX_TOKENS: usize = 4096;
const DETECTION_MAX_TOKENS: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No extraction oracle configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Enhanced runs every stage; basic is a single direct-schema pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Enhanced,
    Basic,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: ExtractionMode,
    pub strategies: Vec<Strategy>,
    /// Fields below this are retried and flagged.
    pub confidence_floor: f64,
    /// Overall confidence under which refinement keeps going.
    pub min_confidence: f64,
    pub max_iterations: usize,
    pub max_retry_fields: usize,
    pub max_tokens: u32,
    pub detection_max_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Enhanced,
            strategies: vec![Strategy::DirectSchema, Strategy::NarrativeThenExtract],
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_retry_fields: DEFAULT_MAX_RETRY_FIELDS,
            max_tokens: DEFAULT_MAX_TOKENS as u32,
            detection_max_tokens: DETECTION_MAX_TOKENS,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            confidence_floor: env_fraction(CONFIDENCE_FLOOR_ENV, DEFAULT_CONFIDENCE_FLOOR)?,
            min_confidence: env_fraction(MIN_CONFIDENCE_ENV, DEFAULT_MIN_CONFIDENCE)?,
            max_iterations: env_usize(MAX_ITERATIONS_ENV, DEFAULT_MAX_ITERATIONS, 1, 10)?,
            max_retry_fields: env_usize(MAX_RETRY_FIELDS_ENV, DEFAULT_MAX_RETRY_FIELDS, 0, 50)?,
            max_tokens: env_usize(MAX_TOKENS_ENV, DEFAULT_MAX_TOKENS, 256, 32_000)? as u32,
            ..Self::default()
        })
    }

    pub fn basic() -> Self {
        Self {
            mode: ExtractionMode::Basic,
            strategies: vec![Strategy::DirectSchema],
            ..Self::default()
        }
    }
}

/// Integer from the environment, clamped to `[min, max]`; blank means default.
pub fn env_usize(name: &str, default: usize, min: usize, max: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            let parsed = v
                .parse::<usize>()
                .map_err(|_| ConfigError::Invalid(format!("invalid {name}={v:?} (expected integer)")))?;
            Ok(parsed.clamp(min, max))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}

/// A value in `[0, 1]` from the environment; out-of-range values are rejected.
pub fn env_fraction(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            match v.parse::<f64>() {
                Ok(parsed) if (0.0..=1.0).contains(&parsed) => Ok(parsed),
                _ => Err(ConfigError::Invalid(format!(
                    "invalid {name}={v:?} (expected a number between 0 and 1)"
                ))),
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.max_retry_fields, 5);
        assert_eq!(PipelineConfig::basic().strategies, vec![Strategy::DirectSchema]);
    }

    #[test]
    fn test_env_helpers() {
        std::env::set_var("INTAKE_TEST_USIZE", "500");
        assert_eq!(env_usize("INTAKE_TEST_USIZE", 3, 1, 10).unwrap(), 10);
        std::env::set_var("INTAKE_TEST_USIZE", "abc");
        assert!(env_usize("INTAKE_TEST_USIZE", 3, 1, 10).is_err());
        assert_eq!(env_usize("INTAKE_TEST_USIZE_UNSET", 3, 1, 10).unwrap(), 3);

        std::env::set_var("INTAKE_TEST_FRACTION", "1.5");
        assert!(env_fraction("INTAKE_TEST_FRACTION", 0.7).is_err());
        std::env::set_var("INTAKE_TEST_FRACTION", " 0.65 ");
        assert_eq!(env_fraction("INTAKE_TEST_FRACTION", 0.7).unwrap(), 0.65);
    }
}
