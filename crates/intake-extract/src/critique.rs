//! Self-critique: the oracle reviews its own consensus against the images.

use crate::oracle::{ExtractionOracle, PageImage};
use crate::{prompts, reply};
use intake_model::Extraction;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CritiqueOutcome {
    /// The reply parsed and was merged.
    pub applied: bool,
    pub corrections: usize,
}

/// Each non-empty section of a parseable reply replaces its counterpart;
/// a failed call or unparseable reply leaves `extraction` untouched.
pub async fn self_critique(
    oracle: &dyn ExtractionOracle,
    images: &[PageImage],
    extraction: &mut Extraction,
    max_tokens: u32,
) -> CritiqueOutcome {
    let prompt = prompts::critique(extraction);
    let text = match oracle.complete(images, &prompt, max_tokens).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "critique call failed; keeping consensus");
            return CritiqueOutcome::default();
        }
    };
    let critiqued = match reply::parse_extraction(&text) {
        Ok(critiqued) => critiqued,
        Err(e) => {
            tracing::warn!(error = %e, "critique reply unparseable; keeping consensus");
            return CritiqueOutcome::default();
        }
    };

    for correction in critiqued.corrections.iter().take(5) {
        tracing::info!(
            field = %correction.field,
            reason = correction.reason.as_deref().unwrap_or("fixed"),
            "critique correction"
        );
    }

    if !critiqued.fields.is_empty() {
        extraction.fields = critiqued.fields;
    }
    if !critiqued.family_members.is_empty() {
        extraction.family_members = critiqued.family_members;
    }
    if !critiqued.history.is_empty() {
        extraction.history = critiqued.history;
    }
    if critiqued.confidence > 0.0 {
        extraction.confidence = critiqued.confidence;
    }
    let corrections = critiqued.corrections.len();
    extraction.corrections.extend(critiqued.corrections);

    CritiqueOutcome {
        applied: true,
        corrections,
    }
}
