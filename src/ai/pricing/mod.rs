//! Model Pricing and Capability Cache
//!
//! Per-model price and token-limit data, refreshed on access once the table
//! is older than its TTL. Cost estimates fall back from cached prices to a
//! provider's own estimator to a static per-family table.
//!
//! ## Modules
//!
//! - `cache`: TTL cache with atomic snapshot swap and stale-data fallback
//! - `source`: OpenRouter-compatible catalogue and generation-cost lookups
//! - `fallback`: hardcoded per-family prices

mod cache;
mod fallback;
mod source;

pub use cache::{PricingCache, PricingSnapshot};
pub use fallback::{FallbackPrice, fallback_estimate, fallback_price};
pub use source::{OpenRouterGenerationLookup, OpenRouterPricingSource};

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChainsiftError;

// =============================================================================
// Pricing Entry
// =============================================================================

/// Price and capability data for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub model_id: String,
    /// USD per prompt token
    pub prompt_price_per_token: f64,
    /// USD per completion token
    pub completion_price_per_token: f64,
    pub context_length: Option<u32>,
    pub max_completion_tokens: Option<u32>,
    pub is_free: bool,
    /// Supported request features, e.g. "structured_outputs"
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl PricingEntry {
    /// Cost of a call in USD
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        if self.is_free {
            return 0.0;
        }
        input_tokens as f64 * self.prompt_price_per_token
            + output_tokens as f64 * self.completion_price_per_token
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// provider -> model id -> entry
pub type PricingTable = HashMap<String, HashMap<String, PricingEntry>>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("pricing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("pricing endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Usage data lags the generation response; retryable
    #[error("generation {0} not found yet")]
    GenerationNotFound(String),

    #[error("failed to decode pricing payload: {0}")]
    Decode(String),

    #[error("no pricing data loaded")]
    NoData,

    #[error("no API key available for generation cost lookup")]
    MissingApiKey,

    #[error("provider {0} does not support generation cost lookup")]
    UnsupportedProvider(String),
}

impl PricingError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::GenerationNotFound(_))
    }
}

impl From<PricingError> for ChainsiftError {
    fn from(err: PricingError) -> Self {
        ChainsiftError::Pricing(err.to_string())
    }
}

// =============================================================================
// Source Traits
// =============================================================================

/// Full-table pricing provider
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn fetch_table(&self) -> std::result::Result<PricingTable, PricingError>;
}

/// Post-hoc billed cost of a single generation
#[async_trait]
pub trait GenerationCostSource: Send + Sync {
    /// Provider whose generation ids this source understands
    fn provider(&self) -> &str;

    async fn generation_cost(
        &self,
        generation_id: &str,
        api_key: &SecretString,
    ) -> std::result::Result<f64, PricingError>;
}
