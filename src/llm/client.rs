use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::pricing::{calculate_cost, server_address};
use super::{GenerateRequest, GenerateResponse, Provider, ServiceError, TextGenerationService};
use crate::config::{Config, KeyRole};
use crate::telemetry::metrics::{
    GEN_AI_COST, GEN_AI_ERROR_COUNT, GEN_AI_FALLBACK_COUNT, GEN_AI_OPERATION_DURATION,
    GEN_AI_RETRY_COUNT, GEN_AI_TOKEN_USAGE,
};

pub struct LlmClient {
    pub primary: Arc<dyn Provider>,
    pub fallback: Option<Arc<dyn Provider>>,
    pub fallback_model: String,
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl LlmClient {
    /// `role` picks the credential for the primary provider. The fallback always
    /// uses its provider key.
    pub fn from_config(config: &Config, role: Option<KeyRole>) -> anyhow::Result<Self> {
        let primary = super::build_provider(&config.llm_provider, config, role)
            .ok_or_else(|| anyhow::anyhow!("unknown LLM provider {}", config.llm_provider))?;
        let fallback = super::build_provider(&config.fallback_provider, config, None);

        Ok(Self {
            primary,
            fallback,
            fallback_model: config.fallback_model.clone(),
            max_attempts: config.llm_max_attempts.max(1),
            call_timeout: config.llm_call_timeout,
        })
    }

    pub async fn generate_once(
        &self,
        provider: &dyn Provider,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ServiceError> {
        let provider_name = provider.name().to_string();
        let (server_addr, server_port) = server_address(&provider_name);
        let start = Instant::now();

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %format!("gen_ai.chat {}", req.model),
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_name,
            gen_ai.request.model = %req.model,
            server.address = %server_addr,
            server.port = server_port,
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = req.max_tokens as i64,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.usage.cost_usd = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            pipeline.stage = %req.stage,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        let mut prompt_attrs = vec![KeyValue::new("gen_ai.prompt", truncate(&req.prompt, 1000))];
        if !req.system.is_empty() {
            prompt_attrs.push(KeyValue::new(
                "gen_ai.system_instructions",
                truncate(&req.system, 500),
            ));
        }
        span.add_event("gen_ai.user.message", prompt_attrs);

        let outcome = tokio::time::timeout(self.call_timeout, provider.generate(req))
            .instrument(span.clone())
            .await;

        let result = match outcome {
            Err(_) => Err(ServiceError::Timeout(self.call_timeout)),
            Ok(Err(err)) => Err(ServiceError::Request {
                provider: provider_name.clone(),
                kind: classify_error(&err),
                message: err.to_string(),
            }),
            Ok(Ok(resp)) if resp.content.trim().is_empty() => Err(ServiceError::EmptyResponse),
            Ok(Ok(resp)) => Ok(resp),
        };

        let duration = start.elapsed().as_secs_f64();
        let provider_kv = KeyValue::new("gen_ai.provider.name", provider_name.clone());

        match result {
            Ok(mut resp) => {
                resp.provider = provider_name;
                resp.cost_usd = calculate_cost(&resp.model, resp.input_tokens, resp.output_tokens);

                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", resp.input_tokens as i64);
                span.record("gen_ai.usage.output_tokens", resp.output_tokens as i64);
                span.record("gen_ai.usage.cost_usd", resp.cost_usd);
                if !resp.finish_reason.is_empty() {
                    span.record(
                        "gen_ai.response.finish_reasons",
                        resp.finish_reason.as_str(),
                    );
                }
                span.add_event(
                    "gen_ai.assistant.message",
                    vec![KeyValue::new(
                        "gen_ai.completion",
                        truncate(&resp.content, 2000),
                    )],
                );

                let op_kv = KeyValue::new("gen_ai.operation.name", "chat");
                let model_kv = KeyValue::new("gen_ai.request.model", resp.model.clone());
                for (token_type, count) in [("input", resp.input_tokens), ("output", resp.output_tokens)]
                {
                    GEN_AI_TOKEN_USAGE.record(
                        f64::from(count),
                        &[
                            KeyValue::new("gen_ai.token.type", token_type),
                            op_kv.clone(),
                            provider_kv.clone(),
                            model_kv.clone(),
                        ],
                    );
                }
                GEN_AI_OPERATION_DURATION.record(
                    duration,
                    &[op_kv.clone(), provider_kv.clone(), model_kv.clone()],
                );
                GEN_AI_COST.add(resp.cost_usd, &[op_kv, provider_kv, model_kv]);

                Ok(resp)
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.type", err.kind());

                GEN_AI_ERROR_COUNT.add(
                    1,
                    &[
                        provider_kv,
                        KeyValue::new("gen_ai.request.model", req.model.clone()),
                        KeyValue::new("error.type", err.kind()),
                    ],
                );

                Err(err)
            }
        }
    }

    pub async fn generate_with_retry(
        &self,
        provider: &dyn Provider,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ServiceError> {
        let mut attempt = 0;
        loop {
            let err = match self.generate_once(provider, req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(err);
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                provider = provider.name(),
                model = %req.model,
                error = %err,
                "LLM call failed, retrying"
            );
            GEN_AI_RETRY_COUNT.add(
                1,
                &[
                    KeyValue::new("gen_ai.provider.name", provider.name().to_string()),
                    KeyValue::new("gen_ai.request.model", req.model.clone()),
                ],
            );
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
}

#[async_trait::async_trait]
impl TextGenerationService for LlmClient {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ServiceError> {
        let primary_err = match self.generate_with_retry(self.primary.as_ref(), req).await {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary_provider = self.primary.name(),
            fallback_provider = fallback.name(),
            error = %primary_err,
            "Primary provider failed, falling back"
        );
        GEN_AI_FALLBACK_COUNT.add(1, &[]);

        let fallback_req = GenerateRequest {
            model: self.fallback_model.clone(),
            ..req.clone()
        };
        self.generate_with_retry(fallback.as_ref(), &fallback_req)
            .await
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = (Duration::from_secs(1) * 2u32.pow(attempt.saturating_sub(1).min(4)))
        .min(Duration::from_secs(10));
    // 25% jitter
    let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter_ms)
}

fn classify_error(err: &anyhow::Error) -> &'static str {
    let msg = err.to_string().to_lowercase();
    if msg.contains("rate limit") || msg.contains("429") || msg.contains("quota") {
        "rate_limit"
    } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline") {
        "timeout"
    } else if msg.contains("401")
        || msg.contains("403")
        || msg.contains("auth")
        || msg.contains("api key")
    {
        "auth_error"
    } else if msg.contains("400") || msg.contains("422") || msg.contains("invalid") {
        "invalid_request"
    } else if msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("server")
    {
        "server_error"
    } else if msg.contains("connect")
        || msg.contains("dns")
        || msg.contains("network")
        || msg.contains("reset")
    {
        "network_error"
    } else {
        "unknown_error"
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.char_indices()
            .take_while(|&(i, c)| i + c.len_utf8() <= max)
            .map(|(_, c)| c)
            .collect()
    }
}
