//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/chainsift/) and project (.chainsift/) level configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ai::resolver::ChainEntry;
use crate::constants::{crawl, network, pricing, resolver};
use crate::crawl::DiscoveryOptions;
use crate::extract::ExtractionSettings;
use crate::types::{ChainsiftError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Pricing cache refresh and lookup settings
    pub pricing: PricingConfig,

    /// Model chain resolution settings
    pub resolver: ResolverConfig,

    /// Per-page extraction settings
    pub extraction: ExtractionSettings,

    /// URL discovery defaults
    pub discovery: DiscoveryOptions,

    /// Crawl orchestration settings
    pub crawl: CrawlConfig,

    /// Operator-owned model chains
    pub chains: ChainsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            pricing: PricingConfig::default(),
            resolver: ResolverConfig::default(),
            extraction: ExtractionSettings::default(),
            discovery: DiscoveryOptions::default(),
            crawl: CrawlConfig::default(),
            chains: ChainsConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ChainsiftError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        let ratio = self.resolver.context_capacity_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ChainsiftError::Config(format!(
                "resolver.context_capacity_ratio must be in (0.0, 1.0], got {}",
                ratio
            )));
        }

        if self.resolver.max_output_tokens_ceiling == 0 {
            return Err(ChainsiftError::Config(
                "resolver.max_output_tokens_ceiling must be greater than 0".to_string(),
            ));
        }

        if self.pricing.refresh_interval_secs == 0 {
            return Err(ChainsiftError::Config(
                "pricing.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.pricing.retry_backoff_factor < 1.0 {
            return Err(ChainsiftError::Config(format!(
                "pricing.retry_backoff_factor must be >= 1.0, got {}",
                self.pricing.retry_backoff_factor
            )));
        }

        if self.crawl.page_concurrency == 0 || self.discovery.concurrency == 0 {
            return Err(ChainsiftError::Config(
                "crawl.page_concurrency and discovery.concurrency must be greater than 0"
                    .to_string(),
            ));
        }

        if self.discovery.max_pages == 0 {
            return Err(ChainsiftError::Config(
                "discovery.max_pages must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Pricing
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Pricing catalogue base URL
    pub endpoint: String,
    /// Table time-to-live in seconds
    pub refresh_interval_secs: u64,
    /// Retries after a failed refresh attempt
    pub refresh_retries: usize,
    /// First retry delay in milliseconds
    pub retry_min_delay_ms: u64,
    /// Growth factor between retry delays
    pub retry_backoff_factor: f32,
    /// Maximum retry delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// Seconds after a failed refresh during which lookups skip refreshing
    pub refresh_cooldown_secs: u64,
    /// Retries for not-yet-visible generation costs
    pub generation_retries: usize,
    /// Delay between generation lookups in milliseconds
    pub generation_retry_delay_ms: u64,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            endpoint: pricing::DEFAULT_ENDPOINT.to_string(),
            refresh_interval_secs: pricing::REFRESH_INTERVAL_SECS,
            refresh_retries: pricing::REFRESH_RETRIES,
            retry_min_delay_ms: pricing::REFRESH_MIN_DELAY_MS,
            retry_backoff_factor: pricing::REFRESH_BACKOFF_FACTOR,
            retry_max_delay_ms: pricing::REFRESH_MAX_DELAY_MS,
            refresh_cooldown_secs: pricing::REFRESH_COOLDOWN_SECS,
            generation_retries: pricing::GENERATION_LOOKUP_RETRIES,
            generation_retry_delay_ms: pricing::GENERATION_LOOKUP_DELAY_MS,
            request_timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PricingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Hard ceiling applied to every resolved max output tokens value
    pub max_output_tokens_ceiling: u32,
    /// Output tokens when nothing else is known
    pub default_max_output_tokens: u32,
    /// Fraction of the context window an input may fill
    pub context_capacity_ratio: f64,
    /// Tier whose chain is the last fallback
    pub free_tier: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_output_tokens_ceiling: resolver::MAX_OUTPUT_TOKENS_CEILING,
            default_max_output_tokens: resolver::DEFAULT_MAX_OUTPUT_TOKENS,
            context_capacity_ratio: resolver::CONTEXT_CAPACITY_RATIO,
            free_tier: resolver::FREE_TIER.to_string(),
        }
    }
}

// =============================================================================
// Crawl
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Pages extracted concurrently
    pub page_concurrency: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_concurrency: crawl::PAGE_CONCURRENCY,
        }
    }
}

// =============================================================================
// Operator Chains
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainsConfig {
    /// Untiered default chain
    pub default: Vec<ChainEntry>,
    /// Tier name -> chain
    pub tiers: BTreeMap<String, Vec<ChainEntry>>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            resolver::FREE_TIER.to_string(),
            vec![ChainEntry::new(
                "openrouter",
                "meta-llama/llama-3.3-70b-instruct:free",
            )],
        );

        Self {
            default: vec![
                ChainEntry::new("openai", "gpt-4o-mini"),
                ChainEntry::new("anthropic", "claude-3-5-haiku-latest"),
            ],
            tiers,
        }
    }
}
