//! Built-in Provider Capabilities
//!
//! Token limits here are static defaults for well-known model families; the
//! pricing catalogue takes precedence whenever it has the model.

use super::{ModelLimits, ProviderCapability};

/// First prefix match wins, so list more specific prefixes first
fn lookup_limits(table: &[(&str, ModelLimits)], model: &str) -> Option<ModelLimits> {
    let lower = model.to_lowercase();
    table
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, limits)| *limits)
}

// =============================================================================
// OpenAI
// =============================================================================

const OPENAI_LIMITS: &[(&str, ModelLimits)] = &[
    ("gpt-4o-mini", ModelLimits::new(128_000, 16_384)),
    ("gpt-4o", ModelLimits::new(128_000, 16_384)),
    ("gpt-4.1", ModelLimits::new(1_047_576, 32_768)),
    ("gpt-4-turbo", ModelLimits::new(128_000, 4096)),
    ("gpt-4", ModelLimits::new(8192, 8192)),
    ("gpt-3.5-turbo", ModelLimits::new(16_385, 4096)),
    ("o3-mini", ModelLimits::new(200_000, 100_000)),
];

#[derive(Debug, Clone, Copy)]
pub struct OpenAiProvider;

impl ProviderCapability for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_base_url(&self) -> Option<&str> {
        Some("https://api.openai.com/v1")
    }

    fn model_limits(&self, model: &str) -> Option<ModelLimits> {
        lookup_limits(OPENAI_LIMITS, model)
    }

    fn supports_strict_json(&self, model: &str) -> bool {
        let lower = model.to_lowercase();
        lower.starts_with("gpt-4o") || lower.starts_with("gpt-4.1") || lower.starts_with("o3")
    }
}

// =============================================================================
// Anthropic
// =============================================================================

const ANTHROPIC_LIMITS: &[(&str, ModelLimits)] = &[
    ("claude-3-5", ModelLimits::new(200_000, 8192)),
    ("claude-3-7", ModelLimits::new(200_000, 64_000)),
    ("claude-sonnet-4", ModelLimits::new(200_000, 64_000)),
    ("claude-opus-4", ModelLimits::new(200_000, 32_000)),
    ("claude-3", ModelLimits::new(200_000, 4096)),
];

#[derive(Debug, Clone, Copy)]
pub struct AnthropicProvider;

impl ProviderCapability for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_base_url(&self) -> Option<&str> {
        Some("https://api.anthropic.com/v1")
    }

    fn model_limits(&self, model: &str) -> Option<ModelLimits> {
        lookup_limits(ANTHROPIC_LIMITS, model)
    }
}

// =============================================================================
// OpenRouter
// =============================================================================

/// Model limits for OpenRouter come from its catalogue, not a static table
#[derive(Debug, Clone, Copy)]
pub struct OpenRouterProvider;

impl ProviderCapability for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_base_url(&self) -> Option<&str> {
        Some("https://openrouter.ai/api/v1")
    }

    fn supports_strict_json(&self, model: &str) -> bool {
        model.starts_with("openai/")
    }
}

// =============================================================================
// Ollama
// =============================================================================

/// Local inference: no credential, no cost
#[derive(Debug, Clone, Copy)]
pub struct OllamaProvider;

impl ProviderCapability for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    fn default_base_url(&self) -> Option<&str> {
        Some("http://localhost:11434/v1")
    }

    fn model_limits(&self, _model: &str) -> Option<ModelLimits> {
        Some(ModelLimits::new(8192, 2048))
    }

    fn estimate_cost(&self, _model: &str, _input_tokens: u64, _output_tokens: u64) -> Option<f64> {
        Some(0.0)
    }
}
