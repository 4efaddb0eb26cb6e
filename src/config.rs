use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

pub const KNOWN_PROVIDERS: [&str; 4] = ["google", "openai", "anthropic", "ollama"];

/// Which credential a client authenticates with on the primary provider.
///
/// Decomposition and refinement run on the utility key; answering and
/// synthesis run on the reasoner key. Either falls back to the provider key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Utility,
    Reasoner,
}

/// Model settings for one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub llm_provider: String,
    pub decomposer: StageSettings,
    pub answerer: StageSettings,
    pub synthesizer: StageSettings,
    pub refiner: StageSettings,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub llm_max_attempts: u32,
    pub llm_call_timeout: Duration,
    pub pipeline_deadline: Duration,
    pub max_concurrent_answers: usize,
    pub ollama_base_url: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub utility_api_key: Option<String>,
    pub reasoner_api_key: Option<String>,
    pub waitlist_path: String,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let default_model = env_or("LLM_MODEL", "gemini-2.5-flash".to_string())?;
        let max_tokens: u32 = env_or("DEFAULT_MAX_TOKENS", 4096)?;

        let stage = |prefix: &str, temperature: f32| -> anyhow::Result<StageSettings> {
            Ok(StageSettings {
                model: env_or(&format!("{prefix}_MODEL"), default_model.clone())?,
                temperature: env_or(&format!("{prefix}_TEMPERATURE"), temperature)?,
                max_tokens,
            })
        };

        let config = Self {
            port: env_or("APP_PORT", 5245)?,
            environment: env_or("APP_ENVIRONMENT", "development".to_string())?,
            llm_provider: env_or("LLM_PROVIDER", "google".to_string())?,
            decomposer: stage("DECOMPOSER", 0.3)?,
            answerer: stage("ANSWERER", 0.5)?,
            synthesizer: stage("SYNTHESIZER", 0.4)?,
            refiner: stage("REFINER", 0.4)?,
            fallback_provider: env_or("FALLBACK_PROVIDER", "none".to_string())?,
            fallback_model: env_or("FALLBACK_MODEL", "gpt-4.1-mini".to_string())?,
            llm_max_attempts: env_or("LLM_MAX_ATTEMPTS", 1)?,
            llm_call_timeout: Duration::from_secs(env_or("LLM_CALL_TIMEOUT_SECS", 60)?),
            pipeline_deadline: Duration::from_secs(env_or("PIPELINE_DEADLINE_SECS", 240)?),
            max_concurrent_answers: env_or("MAX_CONCURRENT_ANSWERS", 5)?,
            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434".to_string())?,
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            google_api_key: env::var("GOOGLE_API_KEY").ok(),
            utility_api_key: env::var("UTILITY_API_KEY").ok(),
            reasoner_api_key: env::var("REASONER_API_KEY").ok(),
            waitlist_path: env_or("WAITLIST_PATH", "data.json".to_string())?,
            otel_service_name: env_or("OTEL_SERVICE_NAME", "atomic-reasoner".to_string())?,
            otel_exporter_endpoint: env_or(
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                "http://localhost:4317".to_string(),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !KNOWN_PROVIDERS.contains(&self.llm_provider.as_str()) {
            bail!(
                "LLM_PROVIDER must be one of {:?}, got {:?}",
                KNOWN_PROVIDERS,
                self.llm_provider
            );
        }
        if self.fallback_provider != "none"
            && !KNOWN_PROVIDERS.contains(&self.fallback_provider.as_str())
        {
            bail!(
                "FALLBACK_PROVIDER must be \"none\" or one of {:?}, got {:?}",
                KNOWN_PROVIDERS,
                self.fallback_provider
            );
        }
        for (name, stage) in [
            ("DECOMPOSER", &self.decomposer),
            ("ANSWERER", &self.answerer),
            ("SYNTHESIZER", &self.synthesizer),
            ("REFINER", &self.refiner),
        ] {
            if !(0.0..=2.0).contains(&stage.temperature) {
                bail!("{name}_TEMPERATURE must be within [0, 2]");
            }
            if stage.model.trim().is_empty() {
                bail!("{name}_MODEL must not be empty");
            }
        }
        if self.max_concurrent_answers == 0 {
            bail!("MAX_CONCURRENT_ANSWERS must be at least 1");
        }
        if self.llm_max_attempts == 0 {
            bail!("LLM_MAX_ATTEMPTS must be at least 1");
        }
        if self.llm_call_timeout.is_zero() || self.pipeline_deadline.is_zero() {
            bail!("LLM_CALL_TIMEOUT_SECS and PIPELINE_DEADLINE_SECS must be positive");
        }
        Ok(())
    }

    pub fn api_key(&self, provider: &str, role: Option<KeyRole>) -> Option<&str> {
        let role_key = match role {
            Some(KeyRole::Utility) => self.utility_api_key.as_deref(),
            Some(KeyRole::Reasoner) => self.reasoner_api_key.as_deref(),
            None => None,
        };
        if provider == self.llm_provider
            && let Some(key) = role_key
        {
            return Some(key);
        }
        match provider {
            "google" => self.google_api_key.as_deref(),
            "openai" => self.openai_api_key.as_deref(),
            "anthropic" => self.anthropic_api_key.as_deref(),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let stage = |temperature| StageSettings {
        model: "test-model".to_string(),
        temperature,
        max_tokens: 1024,
    };
    Config {
        port: 0,
        environment: "test".to_string(),
        llm_provider: "google".to_string(),
        decomposer: stage(0.3),
        answerer: stage(0.5),
        synthesizer: stage(0.4),
        refiner: stage(0.4),
        fallback_provider: "none".to_string(),
        fallback_model: "gpt-4.1-mini".to_string(),
        llm_max_attempts: 1,
        llm_call_timeout: Duration::from_secs(5),
        pipeline_deadline: Duration::from_secs(10),
        max_concurrent_answers: 5,
        ollama_base_url: "http://localhost:11434".to_string(),
        openai_api_key: None,
        anthropic_api_key: None,
        google_api_key: None,
        utility_api_key: None,
        reasoner_api_key: None,
        waitlist_path: "data.json".to_string(),
        otel_service_name: "atomic-reasoner".to_string(),
        otel_exporter_endpoint: "http://localhost:4317".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = test_config();
        config.llm_provider = "mystery".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LLM_PROVIDER"));
    }

    #[test]
    fn test_fallback_none_accepted() {
        let mut config = test_config();
        config.fallback_provider = "none".to_string();
        assert!(config.validate().is_ok());
        config.fallback_provider = "anthropic".to_string();
        assert!(config.validate().is_ok());
        config.fallback_provider = "bogus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_out_of_range() {
        let mut config = test_config();
        config.synthesizer.temperature = 3.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SYNTHESIZER_TEMPERATURE"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = test_config();
        config.max_concurrent_answers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = test_config();
        config.llm_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_role_keys_override_primary_provider_only() {
        let mut config = test_config();
        config.google_api_key = Some("shared".to_string());
        config.openai_api_key = Some("openai".to_string());
        config.utility_api_key = Some("utility".to_string());
        config.reasoner_api_key = Some("reasoner".to_string());

        assert_eq!(config.api_key("google", Some(KeyRole::Utility)), Some("utility"));
        assert_eq!(config.api_key("google", Some(KeyRole::Reasoner)), Some("reasoner"));
        assert_eq!(config.api_key("google", None), Some("shared"));
        assert_eq!(config.api_key("openai", Some(KeyRole::Utility)), Some("openai"));
        assert_eq!(config.api_key("ollama", Some(KeyRole::Utility)), None);

        config.reasoner_api_key = None;
        assert_eq!(config.api_key("google", Some(KeyRole::Reasoner)), Some("shared"));
    }

    #[test]
    fn test_is_production() {
        let mut config = test_config();
        assert!(!config.is_production());
        config.environment = "production".to_string();
        assert!(config.is_production());
    }

    #[test]
    fn test_env_or_missing_uses_default() {
        let value: u32 = env_or("ATOMIC_REASONER_TEST_UNSET_VARIABLE", 17).unwrap();
        assert_eq!(value, 17);
    }
}
