use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::Serialize;

use super::answer::{AtomicAnswer, AtomicAnswerer};
use super::decompose::QueryDecomposer;
use super::synthesize::AnswerSynthesizer;
use super::{Stage, StageError};
use crate::config::Config;
use crate::llm::TextGenerationService;
use crate::telemetry::metrics::{PIPELINE_DURATION, PIPELINE_FAILURES};

pub const FAILURE_MESSAGE: &str = "Failed to process query";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningTrace {
    pub original_query: String,
    pub atomic_decomposition: Vec<String>,
    pub atomic_reasoning: Vec<AtomicAnswer>,
    pub synthesis: String,
    pub key_insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    InvalidQuery,
    Stage(StageError),
    DeadlineExceeded(Duration),
}

impl FailureCause {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::InvalidQuery => "invalid_query",
            FailureCause::Stage(err) => err.kind(),
            FailureCause::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

/// Uniform error envelope. Only `error` and `message` go on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineFailure {
    #[serde(skip)]
    pub stage: Stage,
    #[serde(skip)]
    pub cause: FailureCause,
    pub error: String,
    pub message: &'static str,
}

impl PipelineFailure {
    fn new(stage: Stage, cause: FailureCause) -> Self {
        let error = match &cause {
            FailureCause::InvalidQuery => "query must not be empty".to_string(),
            FailureCause::Stage(err) => format!("{stage} stage failed: {err}"),
            FailureCause::DeadlineExceeded(deadline) => {
                format!("{stage} stage failed: pipeline deadline of {deadline:?} exceeded")
            }
        };
        Self {
            stage,
            cause,
            error,
            message: FAILURE_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum PipelineResult {
    #[serde(rename = "success")]
    Success(ReasoningTrace),
    #[serde(rename = "Error!")]
    Failure(PipelineFailure),
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }
}

enum PipelineState {
    Decomposing,
    Answering {
        questions: Vec<String>,
    },
    Synthesizing {
        questions: Vec<String>,
        answers: Vec<AtomicAnswer>,
    },
    Done(ReasoningTrace),
    Failed(PipelineFailure),
}

/// Runs the decompose, answer and synthesize stages for one query.
///
/// Holds no per-query state; one instance serves concurrent requests.
pub struct Reasoner {
    decomposer: QueryDecomposer,
    answerer: AtomicAnswerer,
    synthesizer: AnswerSynthesizer,
    max_concurrency: usize,
    deadline: Duration,
}

impl Reasoner {
    pub fn new(service: Arc<dyn TextGenerationService>, config: &Config) -> Self {
        Self::with_services(service.clone(), service, config)
    }

    /// Decomposition runs on `utility`; answering and synthesis on `reasoner`.
    pub fn with_services(
        utility: Arc<dyn TextGenerationService>,
        reasoner: Arc<dyn TextGenerationService>,
        config: &Config,
    ) -> Self {
        Self {
            decomposer: QueryDecomposer::new(utility, config.decomposer.clone()),
            answerer: AtomicAnswerer::new(reasoner.clone(), config.answerer.clone()),
            synthesizer: AnswerSynthesizer::new(reasoner, config.synthesizer.clone()),
            max_concurrency: config.max_concurrent_answers,
            deadline: config.pipeline_deadline,
        }
    }

    pub fn from_parts(
        decomposer: QueryDecomposer,
        answerer: AtomicAnswerer,
        synthesizer: AnswerSynthesizer,
        max_concurrency: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            decomposer,
            answerer,
            synthesizer,
            max_concurrency,
            deadline,
        }
    }

    #[tracing::instrument(
        name = "pipeline reason",
        skip(self, original_query),
        fields(
            pipeline.status,
            pipeline.failed_stage,
            pipeline.questions,
            pipeline.duration_ms,
        )
    )]
    pub async fn reason(&self, original_query: &str) -> PipelineResult {
        let started = Instant::now();
        let query = original_query.trim();

        let mut state = if query.is_empty() {
            PipelineState::Failed(PipelineFailure::new(
                Stage::Decomposing,
                FailureCause::InvalidQuery,
            ))
        } else {
            PipelineState::Decomposing
        };

        let result = loop {
            let stage = match state {
                PipelineState::Done(trace) => break PipelineResult::Success(trace),
                PipelineState::Failed(failure) => break PipelineResult::Failure(failure),
                PipelineState::Decomposing => Stage::Decomposing,
                PipelineState::Answering { .. } => Stage::Answering,
                PipelineState::Synthesizing { .. } => Stage::Synthesizing,
            };

            let remaining = self.deadline.saturating_sub(started.elapsed());
            let next = self.step(query, original_query, state);
            state = match tokio::time::timeout(remaining, next).await {
                Ok(next) => next,
                Err(_) => PipelineState::Failed(PipelineFailure::new(
                    stage,
                    FailureCause::DeadlineExceeded(self.deadline),
                )),
            };
        };

        self.record_outcome(&result, started.elapsed());
        result
    }

    async fn step(
        &self,
        query: &str,
        original_query: &str,
        state: PipelineState,
    ) -> PipelineState {
        match state {
            PipelineState::Decomposing => match self.decomposer.decompose(query).await {
                Ok(questions) => PipelineState::Answering { questions },
                Err(err) => fail(Stage::Decomposing, err),
            },
            PipelineState::Answering { questions } => {
                match self
                    .answerer
                    .answer_all(&questions, self.max_concurrency)
                    .await
                {
                    Ok(answers) => PipelineState::Synthesizing { questions, answers },
                    Err(err) => fail(Stage::Answering, err),
                }
            }
            PipelineState::Synthesizing { questions, answers } => {
                match self.synthesizer.synthesize(query, &answers).await {
                    Ok(synthesis) => PipelineState::Done(ReasoningTrace {
                        original_query: original_query.to_string(),
                        atomic_decomposition: questions,
                        atomic_reasoning: answers,
                        synthesis: synthesis.synthesis,
                        key_insights: synthesis.key_insights,
                    }),
                    Err(err) => fail(Stage::Synthesizing, err),
                }
            }
            terminal => terminal,
        }
    }

    fn record_outcome(&self, result: &PipelineResult, elapsed: Duration) {
        let span = tracing::Span::current();
        let elapsed_ms = elapsed.as_millis() as i64;
        span.record("pipeline.duration_ms", elapsed_ms);

        match result {
            PipelineResult::Success(trace) => {
                span.record("pipeline.status", "success");
                span.record("pipeline.questions", trace.atomic_decomposition.len());
                PIPELINE_DURATION.record(
                    elapsed.as_secs_f64(),
                    &[KeyValue::new("pipeline.status", "success")],
                );
                tracing::info!(
                    questions = trace.atomic_decomposition.len(),
                    key_insights = trace.key_insights.len(),
                    duration_ms = elapsed_ms,
                    "reasoning pipeline completed"
                );
            }
            PipelineResult::Failure(failure) => {
                span.record("pipeline.status", "failure");
                span.record("pipeline.failed_stage", failure.stage.as_str());
                PIPELINE_DURATION.record(
                    elapsed.as_secs_f64(),
                    &[KeyValue::new("pipeline.status", "failure")],
                );
                PIPELINE_FAILURES.add(
                    1,
                    &[
                        KeyValue::new("pipeline.stage", failure.stage.as_str()),
                        KeyValue::new("error.type", failure.cause.kind()),
                    ],
                );
                tracing::error!(
                    stage = failure.stage.as_str(),
                    error.type = failure.cause.kind(),
                    error = %failure.error,
                    duration_ms = elapsed_ms,
                    "reasoning pipeline failed"
                );
            }
        }
    }
}

fn fail(stage: Stage, err: StageError) -> PipelineState {
    PipelineState::Failed(PipelineFailure::new(stage, FailureCause::Stage(err)))
}
