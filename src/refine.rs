use std::sync::Arc;

use crate::config::StageSettings;
use crate::llm::{GenerateRequest, ServiceError, TextGenerationService};
use crate::pipeline::request_text;

const SYSTEM: &str = "You are a text refinement agent. You return only the refined text.";

/// Single-call grammar and clarity pass. Not part of the reasoning pipeline.
pub struct TextRefiner {
    service: Arc<dyn TextGenerationService>,
    settings: StageSettings,
}

impl TextRefiner {
    pub fn new(service: Arc<dyn TextGenerationService>, settings: StageSettings) -> Self {
        Self { service, settings }
    }

    #[tracing::instrument(name = "refine", skip_all, fields(refine.input_chars = text.chars().count()))]
    pub async fn refine(&self, text: &str) -> Result<String, ServiceError> {
        let req = GenerateRequest::for_stage("refine", &self.settings, SYSTEM, build_prompt(text));
        request_text(self.service.as_ref(), &req).await
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Refine the text below by correcting grammar, improving clarity and overall quality.\n\n\
        Rules:\n\
        - Output only the refined text, without commentary.\n\
        - Change grammar and structure only; keep the original meaning, context and intent.\n\
        - Do not add information that is not in the original.\n\
        - Keep the length close to the original.\n\n\
        Text:\n{text}"
    )
}
