//! CLI Commands
//!
//! Each subcommand lives in its own module; async commands are driven from
//! `main.rs` on a Tokio runtime.

pub mod config;
pub mod discover;
pub mod estimate;
pub mod resolve;

use std::sync::Arc;

use crate::ai::pricing::OpenRouterPricingSource;
use crate::ai::{PricingCache, ProviderRegistry};
use crate::config::Config;
use crate::types::Result;

/// Pricing cache backed by the configured catalogue endpoint
pub(crate) fn pricing_cache(
    config: &Config,
    registry: ProviderRegistry,
) -> Result<Arc<PricingCache>> {
    let source = OpenRouterPricingSource::new(
        config.pricing.endpoint.clone(),
        config.pricing.request_timeout(),
    )?;
    Ok(Arc::new(PricingCache::new(
        Arc::new(source),
        registry,
        &config.pricing,
    )))
}
