use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};

use super::answer::AtomicAnswer;
use super::contract::{Contract, FieldShape, FieldSpec, parse_contract};
use super::{MAX_ITEMS, MIN_ITEMS, Stage, StageError, request_text};
use crate::config::StageSettings;
use crate::llm::{GenerateRequest, TextGenerationService};
use crate::telemetry::metrics::KEY_INSIGHTS;

const SYSTEM: &str = "You synthesize independent findings into one coherent, well-structured \
    answer. You reply with a single JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub synthesis: String,
    pub key_insights: Vec<String>,
}

impl Contract for SynthesisResult {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec {
            name: "synthesis",
            shape: FieldShape::Text,
        },
        FieldSpec {
            name: "key_insights",
            shape: FieldShape::TextList {
                min: MIN_ITEMS,
                max: MAX_ITEMS,
                distinct: false,
            },
        },
    ];
}

pub struct AnswerSynthesizer {
    service: Arc<dyn TextGenerationService>,
    settings: StageSettings,
}

impl AnswerSynthesizer {
    pub fn new(service: Arc<dyn TextGenerationService>, settings: StageSettings) -> Self {
        Self { service, settings }
    }

    #[tracing::instrument(
        name = "pipeline_stage synthesize",
        skip(self, query, answers),
        fields(
            pipeline.stage = "synthesize",
            synthesis.inputs = answers.len(),
            synthesis.key_insights,
        )
    )]
    pub async fn synthesize(
        &self,
        query: &str,
        answers: &[AtomicAnswer],
    ) -> Result<SynthesisResult, StageError> {
        let req = GenerateRequest::for_stage(
            Stage::Synthesizing.as_str(),
            &self.settings,
            SYSTEM,
            build_prompt(query, answers),
        );

        let raw = request_text(self.service.as_ref(), &req).await?;
        let result: SynthesisResult = parse_contract(&raw).inspect_err(|err| {
            tracing::warn!(error = %err, response = %raw, "synthesis violated its contract");
        })?;

        let count = result.key_insights.len();
        tracing::Span::current().record("synthesis.key_insights", count);
        KEY_INSIGHTS.record(count as f64, &[KeyValue::new("pipeline.stage", "synthesize")]);

        Ok(result)
    }
}

/// Numbered question/answer block, in decomposition order.
pub(crate) fn render_findings(answers: &[AtomicAnswer]) -> String {
    answers
        .iter()
        .enumerate()
        .map(|(i, qa)| {
            format!(
                "Sub-question {}: {}\nAnswer: {}",
                i + 1,
                qa.question,
                qa.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_prompt(query: &str, answers: &[AtomicAnswer]) -> String {
    format!(
        "Original query:\n{query}\n\n\
        Atomic analysis:\n{findings}\n\n\
        Write a synthesis that:\n\
        1. Directly answers the original query.\n\
        2. Integrates the findings of every atomic answer above.\n\
        3. Identifies connections and patterns across the atomic answers.\n\
        4. Is clear and well structured.\n\
        5. Extracts {MIN_ITEMS}-{MAX_ITEMS} key insights or takeaways.\n\n\
        Return ONLY a JSON object in exactly this format, with no commentary before or after it:\n\
        {{\"synthesis\": \"the comprehensive answer\", \"key_insights\": [\"insight 1\", \"insight 2\", \"insight 3\"]}}",
        findings = render_findings(answers),
    )
}
