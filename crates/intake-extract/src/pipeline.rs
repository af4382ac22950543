//! Extraction pipeline
//!
//! ```text
//!  detect ─► strategies ─► consensus ─► critique ─► validate
//!                                                      │
//!              ┌──────── retry ◄──────────────────────┘
//!              ▼
//!        verify family ─► validate ─► refine? ─► validate ─► ... ─► done
//! ```
//!
//! Every oracle call is awaited in turn; nothing overlaps within a document.
//! Oracle failures degrade a stage to a no-op and never fail the document.

use crate::config::{ExtractionMode, PipelineConfig};
use crate::consensus::build_consensus;
use crate::critique::self_critique;
use crate::family::verify_family;
use crate::oracle::{ExtractionOracle, OracleError, PageImage};
use crate::prompts::{self, ExtractionTarget};
use crate::reply;
use crate::retry::{retry_fields, select_fields};
use crate::strategy::run_strategies;
use crate::validator::{Validator, LOW_CONFIDENCE_RULE};
use async_trait::async_trait;
use chrono::NaiveDate;
use intake_model::schema::detect_questionnaire_type;
use intake_model::{Extraction, ExtractionMetrics, SchemaRegistry, ValidationReport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const UNKNOWN_DOCUMENT_TYPE: &str = "unknown";

/// Pipeline states, recorded in the order they ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detect,
    Extract,
    Consensus,
    Critique,
    Validate,
    Retry,
    VerifyFamily,
    Refine,
    Done,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub extraction: Extraction,
    /// Validation of `extraction` as returned.
    pub report: ValidationReport,
    pub metrics: ExtractionMetrics,
    pub trace: Vec<Stage>,
    /// Set when nothing usable came back; the document needs manual entry.
    pub structural_error: Option<String>,
}

/// Counts calls for the metrics without the stages knowing about it.
struct CountingOracle<'a> {
    inner: &'a dyn ExtractionOracle,
    calls: AtomicUsize,
}

#[async_trait]
impl<'a> ExtractionOracle for CountingOracle<'a> {
    async fn complete(&self, images: &[PageImage], prompt: &str, max_tokens: u32) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.complete(images, prompt, max_tokens).await
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Fewer BLOCKING issues wins; confidence breaks ties.
fn is_better(report: &ValidationReport, confidence: f64, best_report: &ValidationReport, best_confidence: f64) -> bool {
    match report.blocking_count().cmp(&best_report.blocking_count()) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => confidence > best_confidence,
    }
}

pub struct Pipeline {
    oracle: Arc<dyn ExtractionOracle>,
    registry: Arc<SchemaRegistry>,
    validator: Validator,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, registry: Arc<SchemaRegistry>, config: PipelineConfig) -> Self {
        let validator = Validator::new(registry.clone(), config.confidence_floor);
        Self {
            oracle,
            registry,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Run against today's local date.
    pub async fn process(&self, images: &[PageImage], document_type: Option<&str>) -> PipelineOutcome {
        self.process_at(images, document_type, chrono::Local::now().date_naive()).await
    }

    /// `document_type` skips detection when given; `today` anchors the date rules.
    pub async fn process_at(&self, images: &[PageImage], document_type: Option<&str>, today: NaiveDate) -> PipelineOutcome {
        let oracle = CountingOracle {
            inner: self.oracle.as_ref(),
            calls: AtomicUsize::new(0),
        };
        let mut trace = Vec::new();
        let mut metrics = ExtractionMetrics::default();

        let (doc_key, questionnaire_type) = match document_type {
            Some(key) => self.split_type(key, None),
            None => {
                trace.push(Stage::Detect);
                self.detect(&oracle, images).await
            }
        };

        let resolved = self.registry.resolve(&doc_key, questionnaire_type.as_deref());
        let generic;
        let target = match resolved {
            Some(doc) => ExtractionTarget {
                display_name: &doc.display_name,
                fields: &doc.fields,
                registry: &self.registry,
            },
            None => {
                generic = self.registry.generic_fields();
                ExtractionTarget {
                    display_name: "Document",
                    fields: &generic,
                    registry: &self.registry,
                }
            }
        };

        tracing::info!(
            document_type = %doc_key,
            questionnaire_type = questionnaire_type.as_deref().unwrap_or("-"),
            pages = images.len(),
            model = oracle.model(),
            "extracting document"
        );

        trace.push(Stage::Extract);
        let outcomes = run_strategies(&oracle, images, &target, &self.config.strategies, self.config.max_tokens).await;
        metrics.strategies_used = outcomes.iter().map(|o| o.strategy.to_string()).collect();
        let results: Vec<Extraction> = outcomes.into_iter().map(|o| o.extraction).collect();

        trace.push(Stage::Consensus);
        let mut extraction = build_consensus(&results);
        extraction.document_type = doc_key.clone();
        extraction.questionnaire_type = questionnaire_type.clone();
        tracing::info!(
            fields = extraction.fields.len(),
            family = extraction.family_members.len(),
            confidence = extraction.confidence,
            "consensus built"
        );

        let (extraction, report) = match self.config.mode {
            ExtractionMode::Basic => {
                trace.push(Stage::Validate);
                let report = self.validator.validate(&extraction, today);
                metrics.iterations = 1;
                metrics.blocking_initial = report.blocking_count();
                metrics.low_confidence_initial = report.by_rule(LOW_CONFIDENCE_RULE).count();
                (extraction, report)
            }
            ExtractionMode::Enhanced => {
                self.enhance(&oracle, images, extraction, today, &mut metrics, &mut trace)
                    .await
            }
        };

        trace.push(Stage::Done);
        metrics.oracle_calls = oracle.calls.load(Ordering::Relaxed);
        metrics.blocking_final = report.blocking_count();
        metrics.low_confidence_final = report.by_rule(LOW_CONFIDENCE_RULE).count();

        let structural_error = extraction
            .is_empty()
            .then(|| "Extraction produced no usable data; needs manual entry".to_string());
        if let Some(error) = &structural_error {
            tracing::warn!(document_type = %doc_key, "{error}");
        }

        PipelineOutcome {
            extraction,
            report,
            metrics,
            trace,
            structural_error,
        }
    }

    fn split_type(&self, key: &str, questionnaire_name: Option<&str>) -> (String, Option<String>) {
        let key = key.trim().to_ascii_lowercase();
        if key.starts_with("questionnaire_") && self.registry.document_type(&key).is_some() {
            return ("questionnaire".to_string(), Some(key));
        }
        if self.registry.document_type(&key).is_none() {
            return (UNKNOWN_DOCUMENT_TYPE.to_string(), None);
        }
        let sub = (key == "questionnaire")
            .then(|| questionnaire_name.and_then(detect_questionnaire_type))
            .flatten()
            .map(str::to_string);
        (key, sub)
    }

    async fn detect(&self, oracle: &dyn ExtractionOracle, images: &[PageImage]) -> (String, Option<String>) {
        let Some(first) = images.first() else {
            return (UNKNOWN_DOCUMENT_TYPE.to_string(), None);
        };
        let prompt = prompts::detection(self.registry.document_types());
        let text = match oracle
            .complete(std::slice::from_ref(first), &prompt, self.config.detection_max_tokens)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "document type detection failed");
                return (UNKNOWN_DOCUMENT_TYPE.to_string(), None);
            }
        };
        match reply::parse_detection(&text) {
            Ok(detection) => self.split_type(&detection.document_type, detection.questionnaire_name.as_deref()),
            Err(e) => {
                tracing::warn!(error = %e, "detection reply unparseable");
                (UNKNOWN_DOCUMENT_TYPE.to_string(), None)
            }
        }
    }

    async fn enhance(
        &self,
        oracle: &dyn ExtractionOracle,
        images: &[PageImage],
        mut extraction: Extraction,
        today: NaiveDate,
        metrics: &mut ExtractionMetrics,
        trace: &mut Vec<Stage>,
    ) -> (Extraction, ValidationReport) {
        let max_tokens = self.config.max_tokens;

        trace.push(Stage::Critique);
        let critique = self_critique(oracle, images, &mut extraction, max_tokens).await;
        metrics.critique_corrections = critique.corrections;

        trace.push(Stage::Validate);
        let report = self.validator.validate(&extraction, today);
        metrics.blocking_initial = report.blocking_count();
        metrics.low_confidence_initial = report.by_rule(LOW_CONFIDENCE_RULE).count();

        let keys = select_fields(&report, &extraction, self.config.max_retry_fields);
        if !keys.is_empty() {
            trace.push(Stage::Retry);
            let retry = retry_fields(oracle, images, &mut extraction, &keys, max_tokens).await;
            metrics.retried_fields = retry.requested.len();
            metrics.improved_fields = retry.improved.len();
        }

        if !extraction.family_members.is_empty() {
            trace.push(Stage::VerifyFamily);
            let verify = verify_family(oracle, images, &mut extraction, max_tokens).await;
            metrics.family_verified = verify.verified;
            metrics.family_dropped = verify.dropped;
        }

        trace.push(Stage::Validate);
        let mut report = self.validator.validate(&extraction, today);
        metrics.iterations = 1;
        let mut best = (extraction.clone(), report.clone());

        while (report.blocking_count() > 0 || extraction.confidence < self.config.min_confidence)
            && metrics.iterations < self.config.max_iterations
        {
            let Some(prompt) = prompts::refine(&report) else {
                tracing::debug!("nothing to feed back; refinement skipped");
                break;
            };
            trace.push(Stage::Refine);
            metrics.iterations += 1;
            let refined = match oracle.complete(images, &prompt, max_tokens).await {
                Ok(text) => reply::parse_extraction_lenient(&text, "refine"),
                Err(e) => {
                    tracing::warn!(error = %e, iteration = metrics.iterations, "refinement call failed");
                    break;
                }
            };
            for (key, field) in refined.fields {
                if !field.value.trim().is_empty() {
                    extraction.fields.insert(key, field);
                }
            }
            if let Some(mean) = extraction.mean_field_confidence() {
                extraction.confidence = mean;
            }

            trace.push(Stage::Validate);
            report = self.validator.validate(&extraction, today);
            tracing::info!(
                iteration = metrics.iterations,
                blocking = report.blocking_count(),
                confidence = extraction.confidence,
                "refinement pass"
            );
            if is_better(&report, extraction.confidence, &best.1, best.0.confidence) {
                best = (extraction.clone(), report.clone());
            }
        }

        best
    }
}
