use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::{Stage, StageError, request_text};
use crate::config::StageSettings;
use crate::llm::{GenerateRequest, TextGenerationService};

const SYSTEM: &str = "You are an expert analyst answering a single, standalone question \
    with precision and clarity.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtomicAnswer {
    pub question: String,
    pub answer: String,
}

/// Resolves each atomic question in its own fresh context, with no shared history.
pub struct AtomicAnswerer {
    service: Arc<dyn TextGenerationService>,
    settings: StageSettings,
}

impl AtomicAnswerer {
    pub fn new(service: Arc<dyn TextGenerationService>, settings: StageSettings) -> Self {
        Self { service, settings }
    }

    #[tracing::instrument(
        name = "pipeline_stage answer",
        skip_all,
        fields(pipeline.stage = "answer", atomic.index = index, answer.chars)
    )]
    pub async fn answer(&self, index: usize, question: &str) -> Result<AtomicAnswer, StageError> {
        let req = GenerateRequest::for_stage(
            Stage::Answering.as_str(),
            &self.settings,
            SYSTEM,
            build_prompt(question),
        );

        let answer = request_text(self.service.as_ref(), &req).await?;
        tracing::Span::current().record("answer.chars", answer.chars().count());

        Ok(AtomicAnswer {
            question: question.to_string(),
            answer,
        })
    }

    /// Answers every question concurrently, at most `max_concurrency` at a time.
    ///
    /// The returned answers follow the order of `questions`. The first failure
    /// aborts the stage; calls still in flight are dropped with the stream.
    pub async fn answer_all(
        &self,
        questions: &[String],
        max_concurrency: usize,
    ) -> Result<Vec<AtomicAnswer>, StageError> {
        let width = max_concurrency.clamp(1, questions.len().max(1));
        tracing::debug!(questions = questions.len(), width, "fanning out atomic questions");

        let mut slots: Vec<Option<AtomicAnswer>> = vec![None; questions.len()];
        let pending: Vec<_> = questions
            .iter()
            .enumerate()
            .map(|(index, question)| async move {
                self.answer(index, question)
                    .await
                    .map(|answer| (index, answer))
            })
            .collect();
        let mut in_flight = stream::iter(pending).buffer_unordered(width);

        while let Some(outcome) = in_flight.next().await {
            let (index, answer) = outcome?;
            slots[index] = Some(answer);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

fn build_prompt(question: &str) -> String {
    format!(
        "Answer the question below concisely but completely.\n\n\
        Rules:\n\
        1. Give a direct, factual answer.\n\
        2. Stay focused and relevant: 3-5 sentences.\n\
        3. Include specific details, data or examples where applicable.\n\
        4. Be precise and avoid vague statements.\n\
        5. Treat this as a standalone answer; assume no prior context.\n\n\
        Question: {question}\n\n\
        Answer:"
    )
}
