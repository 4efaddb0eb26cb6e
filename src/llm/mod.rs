pub mod anthropic;
pub mod client;
pub mod openai;
pub mod pricing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, KeyRole, StageSettings};

pub use client::LlmClient;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stage: &'static str,
}

impl GenerateRequest {
    pub fn for_stage(
        stage: &'static str,
        settings: &StageSettings,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: settings.model.clone(),
            system: system.into(),
            prompt: prompt.into(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stage,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub finish_reason: String,
    pub provider: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{provider} request failed ({kind}): {message}")]
    Request {
        provider: String,
        kind: &'static str,
        message: String,
    },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("service returned an empty response")]
    EmptyResponse,
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Request { kind, .. } => *kind,
            ServiceError::Timeout(_) => "timeout",
            ServiceError::EmptyResponse => "empty_response",
        }
    }
}

/// Raw wire adapter for a single vendor API.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse>;
    fn name(&self) -> &str;
}

/// The text-generation capability the reasoning pipeline depends on.
///
/// Implementations must be safe to call concurrently and must not carry any
/// conversational state from one call to the next.
#[async_trait::async_trait]
pub trait TextGenerationService: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ServiceError>;
}

pub fn build_provider(
    name: &str,
    config: &Config,
    role: Option<KeyRole>,
) -> Option<Arc<dyn Provider>> {
    let key = config.api_key(name, role).unwrap_or_default();
    match name {
        "google" => Some(Arc::new(openai::OpenAIProvider::new_google(key))),
        "openai" => Some(Arc::new(openai::OpenAIProvider::new(key))),
        "anthropic" => Some(Arc::new(anthropic::AnthropicProvider::new(key))),
        "ollama" => Some(Arc::new(openai::OpenAIProvider::new_ollama(
            &config.ollama_base_url,
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_for_stage_copies_settings() {
        let settings = StageSettings {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.3,
            max_tokens: 512,
        };
        let req = GenerateRequest::for_stage("decompose", &settings, "sys", "prompt");
        assert_eq!(req.model, "gemini-2.5-flash");
        assert_eq!(req.temperature, 0.3);
        assert_eq!(req.max_tokens, 512);
        assert_eq!(req.stage, "decompose");
        assert_eq!(req.system, "sys");
        assert_eq!(req.prompt, "prompt");
    }

    #[test]
    fn test_service_error_kind() {
        let err = ServiceError::Request {
            provider: "google".to_string(),
            kind: "rate_limit",
            message: "429".to_string(),
        };
        assert_eq!(err.kind(), "rate_limit");
        assert_eq!(
            ServiceError::Timeout(Duration::from_secs(1)).kind(),
            "timeout"
        );
        assert_eq!(ServiceError::EmptyResponse.kind(), "empty_response");
    }

    #[test]
    fn test_build_provider_names() {
        let config = test_config();
        for name in crate::config::KNOWN_PROVIDERS {
            let provider = build_provider(name, &config, Some(KeyRole::Utility)).expect("known provider");
            assert_eq!(provider.name(), name);
        }
        assert!(build_provider("none", &config, None).is_none());
    }
}
