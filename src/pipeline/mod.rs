pub mod answer;
pub mod contract;
pub mod decompose;
pub mod orchestrator;
pub mod synthesize;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::llm::{GenerateRequest, ServiceError, TextGenerationService};

pub use answer::{AtomicAnswer, AtomicAnswerer};
pub use contract::ContractViolation;
pub use decompose::QueryDecomposer;
pub use orchestrator::{FailureCause, PipelineFailure, PipelineResult, Reasoner, ReasoningTrace};
pub use synthesize::{AnswerSynthesizer, SynthesisResult};

/// Bounds on the number of atomic questions and key insights.
pub const MIN_ITEMS: usize = 3;
pub const MAX_ITEMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decomposing,
    Answering,
    Synthesizing,
}

impl Stage {
    /// Short label used on LLM requests, spans and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decomposing => "decompose",
            Stage::Answering => "answer",
            Stage::Synthesizing => "synthesize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Decomposing => "decomposition",
            Stage::Answering => "answering",
            Stage::Synthesizing => "synthesis",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Service(_) => "service_error",
            StageError::Contract(_) => "contract_violation",
        }
    }
}

/// Issues one request and returns the trimmed text, treating a blank reply as a
/// service failure.
pub(crate) async fn request_text(
    service: &dyn TextGenerationService,
    req: &GenerateRequest,
) -> Result<String, ServiceError> {
    let resp = service.generate(req).await?;
    let text = resp.content.trim();
    if text.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(text.to_string())
}
