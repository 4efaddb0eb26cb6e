use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;

const BUNDLED_PRICING: &str = include_str!("../../data/pricing.json");

/// USD per million tokens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PriceEntry {
    pub provider: String,
    pub input: f64,
    pub output: f64,
}

#[derive(Deserialize)]
struct PricingFile {
    models: HashMap<String, PriceEntry>,
}

fn parse_pricing(data: &str) -> Option<HashMap<String, PriceEntry>> {
    serde_json::from_str::<PricingFile>(data)
        .ok()
        .map(|file| file.models)
        .filter(|models| !models.is_empty())
}

pub static PRICING: LazyLock<HashMap<String, PriceEntry>> = LazyLock::new(|| {
    if let Ok(path) = std::env::var("PRICING_JSON_PATH") {
        match std::fs::read_to_string(&path).ok().as_deref().and_then(parse_pricing) {
            Some(models) => return models,
            None => tracing::warn!(%path, "PRICING_JSON_PATH unreadable, using bundled prices"),
        }
    }
    parse_pricing(BUNDLED_PRICING).unwrap_or_else(|| {
        tracing::warn!("bundled pricing table is invalid, costs will be $0.00");
        HashMap::new()
    })
});

pub fn calculate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let entry = PRICING.get(model).or_else(|| {
        // Providers often answer with a dated or prefixed model id.
        PRICING
            .iter()
            .filter(|(name, _)| model.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, entry)| entry)
    });
    match entry {
        Some(entry) => {
            (f64::from(input_tokens) * entry.input / 1_000_000.0)
                + (f64::from(output_tokens) * entry.output / 1_000_000.0)
        }
        None => 0.0,
    }
}

pub fn server_address(provider: &str) -> (&'static str, i64) {
    match provider {
        "openai" => ("api.openai.com", 443),
        "anthropic" => ("api.anthropic.com", 443),
        "google" => ("generativelanguage.googleapis.com", 443),
        "ollama" => ("localhost", 11434),
        _ => ("unknown", 443),
    }
}
