use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Deserialize;

use super::contract::{Contract, FieldShape, FieldSpec, parse_contract};
use super::{MAX_ITEMS, MIN_ITEMS, Stage, StageError, request_text};
use crate::config::StageSettings;
use crate::llm::{GenerateRequest, TextGenerationService};
use crate::telemetry::metrics::ATOMIC_QUESTIONS;

const SYSTEM: &str = "You decompose complex questions into atomic, independent sub-questions. \
    You reply with a single JSON object and nothing else.";

#[derive(Debug, Deserialize)]
struct Decomposition {
    questions: Vec<String>,
}

impl Contract for Decomposition {
    const FIELDS: &'static [FieldSpec] = &[FieldSpec {
        name: "questions",
        shape: FieldShape::TextList {
            min: MIN_ITEMS,
            max: MAX_ITEMS,
            distinct: true,
        },
    }];
}

pub struct QueryDecomposer {
    service: Arc<dyn TextGenerationService>,
    settings: StageSettings,
}

impl QueryDecomposer {
    pub fn new(service: Arc<dyn TextGenerationService>, settings: StageSettings) -> Self {
        Self { service, settings }
    }

    #[tracing::instrument(
        name = "pipeline_stage decompose",
        skip(self, query),
        fields(pipeline.stage = "decompose", decomposition.questions)
    )]
    pub async fn decompose(&self, query: &str) -> Result<Vec<String>, StageError> {
        let req = GenerateRequest::for_stage(
            Stage::Decomposing.as_str(),
            &self.settings,
            SYSTEM,
            build_prompt(query),
        );

        let raw = request_text(self.service.as_ref(), &req).await?;
        let decomposition: Decomposition = parse_contract(&raw).inspect_err(|err| {
            tracing::warn!(error = %err, response = %raw, "decomposition violated its contract");
        })?;

        let count = decomposition.questions.len();
        tracing::Span::current().record("decomposition.questions", count);
        ATOMIC_QUESTIONS.record(count as f64, &[KeyValue::new("pipeline.stage", "decompose")]);

        Ok(decomposition.questions)
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        "Decompose the query below into {MIN_ITEMS}-{MAX_ITEMS} atomic sub-questions.\n\n\
        Rules:\n\
        1. Every sub-question must be self-contained and answerable on its own.\n\
        2. No sub-question may depend on the answer to another one (memoryless).\n\
        3. Together the sub-questions must cover every aspect of the query.\n\
        4. Each sub-question must be specific, focused and directly answerable.\n\
        5. Do not repeat a sub-question.\n\n\
        Query: {query}\n\n\
        Return ONLY a JSON object in exactly this format, with no commentary before or after it:\n\
        {{\"questions\": [\"question 1\", \"question 2\", \"question 3\"]}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::pipeline::ContractViolation;
    use crate::pipeline::testing::{FakeService, HEAT_ISLAND_DECOMPOSITION, HEAT_ISLAND_QUERY};

    fn decomposer(service: Arc<FakeService>) -> QueryDecomposer {
        QueryDecomposer::new(service, test_config().decomposer)
    }

    #[test]
    fn test_prompt_embeds_query_and_format() {
        let prompt = build_prompt(HEAT_ISLAND_QUERY);
        assert!(prompt.contains(HEAT_ISLAND_QUERY));
        assert!(prompt.contains(r#"{"questions": ["#));
        assert!(prompt.contains("3-5"));
    }

    #[tokio::test]
    async fn test_decompose_returns_questions_in_order() {
        let service = Arc::new(FakeService::new(HEAT_ISLAND_DECOMPOSITION, "{}"));
        let questions = decomposer(service.clone())
            .decompose(HEAT_ISLAND_QUERY)
            .await
            .unwrap();
        assert_eq!(
            questions,
            vec![
                "What physical factors cause urban heat islands?",
                "What are the human-health effects of urban heat islands?",
                "What mitigation strategies reduce urban heat island intensity?",
            ]
        );

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].stage, "decompose");
        assert_eq!(requests[0].temperature, 0.3);
        assert!(requests[0].prompt.contains(HEAT_ISLAND_QUERY));
    }

    #[tokio::test]
    async fn test_decompose_accepts_fenced_payload() {
        let fenced = format!("```json\n{HEAT_ISLAND_DECOMPOSITION}\n```");
        let service = Arc::new(FakeService::new(&fenced, "{}"));
        let questions = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap();
        assert_eq!(questions.len(), 3);
    }

    #[tokio::test]
    async fn test_decompose_rejects_too_few_questions() {
        let service = Arc::new(FakeService::new(
            r#"{"questions": ["What is an urban heat island?", "Why does it matter?"]}"#,
            "{}",
        ));
        let err = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap_err();
        assert_eq!(
            err,
            StageError::Contract(ContractViolation::Arity {
                field: "questions",
                min: 3,
                max: 5,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn test_decompose_rejects_too_many_questions() {
        let service = Arc::new(FakeService::new(
            r#"{"questions": ["q1", "q2", "q3", "q4", "q5", "q6"]}"#,
            "{}",
        ));
        let err = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Contract(ContractViolation::Arity { actual: 6, .. })
        ));
    }

    #[tokio::test]
    async fn test_decompose_rejects_duplicate_questions() {
        let service = Arc::new(FakeService::new(
            r#"{"questions": ["What causes heat islands?", "What causes heat islands?", "How hot do they get?"]}"#,
            "{}",
        ));
        let err = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Contract(ContractViolation::DuplicateItem { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_decompose_rejects_prose() {
        let service = Arc::new(FakeService::new("Sorry, I cannot help with that.", "{}"));
        let err = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Contract(ContractViolation::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_decompose_propagates_service_error() {
        let service = Arc::new(FakeService::new(HEAT_ISLAND_DECOMPOSITION, "{}").failing_stage("decompose"));
        let err = decomposer(service).decompose(HEAT_ISLAND_QUERY).await.unwrap_err();
        assert_eq!(err.kind(), "service_error");
    }
}
