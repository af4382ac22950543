//! Extraction strategies: independent prompts over the same images.

use crate::oracle::{ExtractionOracle, PageImage};
use crate::prompts::{self, ExtractionTarget};
use crate::reply;
use intake_model::Extraction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Straight to the JSON schema.
    DirectSchema,
    /// Describe the document first, then extract.
    NarrativeThenExtract,
    /// Walk the sections in a fixed order.
    SectionBySection,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DirectSchema => "direct_schema",
            Strategy::NarrativeThenExtract => "narrative_then_extract",
            Strategy::SectionBySection => "section_by_section",
        }
    }

    pub fn prompt(&self, target: &ExtractionTarget<'_>) -> String {
        match self {
            Strategy::DirectSchema => prompts::base_extraction(
                target,
                "\nExtract ALL information into this exact JSON structure.\nBe precise - extract exactly what is written.",
            ),
            Strategy::NarrativeThenExtract => format!(
                "First, describe what you see in this document in 2-3 sentences.\nThen, extract all information into JSON format.\n\n{}",
                prompts::base_extraction(
                    target,
                    "\nAfter describing the document, extract all fields.\nLook carefully at each section before extracting.",
                )
            ),
            Strategy::SectionBySection => prompts::base_extraction(
                target,
                "\nGo through the document section by section:\n\
                 1. First, find the personal information section\n\
                 2. Then, find any family member information\n\
                 3. Then, find any address/employment/education history\n\
                 4. Finally, note any other important information\n\n\
                 Extract each section carefully before moving to the next.",
            ),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" | "direct_schema" | "structured" => Ok(Strategy::DirectSchema),
            "narrative" | "narrative_then_extract" => Ok(Strategy::NarrativeThenExtract),
            "section" | "section_by_section" | "field_by_field" => Ok(Strategy::SectionBySection),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// One strategy's result; `succeeded` is false for a failed call or an
/// unparseable reply, in which case `extraction` is empty at confidence 0.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub strategy: Strategy,
    pub extraction: Extraction,
    pub succeeded: bool,
}

/// Run each strategy in order. Failures are logged and contribute an empty
/// result; they never abort the document.
pub async fn run_strategies(
    oracle: &dyn ExtractionOracle,
    images: &[PageImage],
    target: &ExtractionTarget<'_>,
    strategies: &[Strategy],
    max_tokens: u32,
) -> Vec<StrategyOutcome> {
    let mut outcomes = Vec::with_capacity(strategies.len());
    for &strategy in strategies {
        let prompt = strategy.prompt(target);
        let outcome = match oracle.complete(images, &prompt, max_tokens).await {
            Ok(text) => match reply::parse_extraction(&text) {
                Ok(extraction) => StrategyOutcome {
                    strategy,
                    extraction,
                    succeeded: true,
                },
                Err(e) => {
                    tracing::warn!(%strategy, error = %e, "strategy reply unparseable");
                    StrategyOutcome {
                        strategy,
                        extraction: reply::unparsed(&text),
                        succeeded: false,
                    }
                }
            },
            Err(e) => {
                tracing::warn!(%strategy, error = %e, "strategy call failed");
                StrategyOutcome {
                    strategy,
                    extraction: Extraction::empty(),
                    succeeded: false,
                }
            }
        };
        tracing::debug!(
            %strategy,
            fields = outcome.extraction.fields.len(),
            family = outcome.extraction.family_members.len(),
            "strategy finished"
        );
        outcomes.push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use intake_model::SchemaRegistry;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("narrative".parse::<Strategy>().unwrap(), Strategy::NarrativeThenExtract);
        assert_eq!("section-by-section".parse::<Strategy>().unwrap(), Strategy::SectionBySection);
        assert!("guess".parse::<Strategy>().is_err());
    }

    #[tokio::test]
    async fn test_failed_strategy_contributes_empty() {
        let registry = SchemaRegistry::standard();
        let fields = registry.generic_fields();
        let target = ExtractionTarget {
            display_name: "Document",
            fields: &fields,
            registry: &registry,
        };
        let oracle = ScriptedOracle::new()
            .on("Be precise", r#"{"confidence": 0.9, "fields": {"first_name": {"value": "Ana", "confidence": 0.9}}}"#)
            .fail_on("describe what you see", "timeout");

        let outcomes = run_strategies(
            &oracle,
            &[],
            &target,
            &[Strategy::DirectSchema, Strategy::NarrativeThenExtract],
            1000,
        )
        .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].succeeded);
        assert!(!outcomes[1].succeeded);
        assert!(outcomes[1].extraction.fields.is_empty());
        assert_eq!(outcomes[1].extraction.confidence, 0.0);
    }
}
