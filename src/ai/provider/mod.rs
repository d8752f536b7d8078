//! Provider Capability Registry
//!
//! Describes what the orchestration layer needs to know about each LLM
//! provider without talking to it: whether it needs a credential, its default
//! endpoint, known token limits, strict-JSON support, and an optional native
//! cost estimator.
//!
//! Adding a provider means registering one [`ProviderCapability`]; nothing
//! else dispatches on provider names.
//!
//! ## Modules
//!
//! - `builtin`: openai, anthropic, openrouter, ollama

mod builtin;

pub use builtin::{AnthropicProvider, OllamaProvider, OpenAiProvider, OpenRouterProvider};

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Capability Trait
// =============================================================================

/// Known token limits for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub context_length: u32,
    pub max_output_tokens: u32,
}

impl ModelLimits {
    pub const fn new(context_length: u32, max_output_tokens: u32) -> Self {
        Self {
            context_length,
            max_output_tokens,
        }
    }
}

/// Static description of a provider
pub trait ProviderCapability: Send + Sync {
    /// Registry key, e.g. "openai"
    fn name(&self) -> &str;

    /// Whether calls need an API key
    fn requires_auth(&self) -> bool {
        true
    }

    /// Endpoint used when a chain entry does not pin one
    fn default_base_url(&self) -> Option<&str> {
        None
    }

    /// Static token limits for well-known model families
    fn model_limits(&self, _model: &str) -> Option<ModelLimits> {
        None
    }

    /// Whether the model honours a strict JSON-schema response format
    fn supports_strict_json(&self, _model: &str) -> bool {
        false
    }

    /// Provider-native cost estimate in USD, if the provider can price itself
    fn estimate_cost(&self, _model: &str, _input_tokens: u64, _output_tokens: u64) -> Option<f64> {
        None
    }
}

pub type SharedCapability = Arc<dyn ProviderCapability>;

// =============================================================================
// Registry
// =============================================================================

/// Concurrent provider registry
///
/// Uses DashMap so providers can be registered while resolvers read.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<String, SharedCapability>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in providers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OpenAiProvider));
        registry.register(Arc::new(AnthropicProvider));
        registry.register(Arc::new(OpenRouterProvider));
        registry.register(Arc::new(OllamaProvider));
        registry
    }

    /// Register or replace a provider
    pub fn register(&self, provider: SharedCapability) {
        self.providers
            .insert(provider.name().to_lowercase(), provider);
    }

    pub fn get(&self, name: &str) -> Option<SharedCapability> {
        self.providers
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Unknown providers are assumed to need a credential
    pub fn requires_auth(&self, name: &str) -> bool {
        self.get(name).is_none_or(|p| p.requires_auth())
    }

    pub fn model_limits(&self, provider: &str, model: &str) -> Option<ModelLimits> {
        self.get(provider).and_then(|p| p.model_limits(model))
    }

    pub fn native_estimate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Option<f64> {
        self.get(provider)
            .and_then(|p| p.estimate_cost(model, input_tokens, output_tokens))
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
