//! Estimate Command
//!
//! Usage:
//!   chainsift estimate --provider openai --model gpt-4o-mini --input 12000 --output 800

use super::pricing_cache;
use crate::ai::ProviderRegistry;
use crate::config::ConfigLoader;
use crate::types::Result;

pub async fn run(
    provider: &str,
    model: &str,
    input_tokens: u64,
    output_tokens: u64,
) -> Result<()> {
    let config = ConfigLoader::load()?;
    let pricing = pricing_cache(&config, ProviderRegistry::with_builtins())?;
    let provider = provider.to_lowercase();

    let cost = pricing
        .estimate_cost(&provider, model, input_tokens, output_tokens)
        .await;
    let source = if pricing.get_pricing(&provider, model).await.is_some() {
        "catalogue"
    } else {
        "fallback"
    };

    println!(
        "{}/{}: ${:.6} ({} in / {} out, {} pricing)",
        provider, model, cost, input_tokens, output_tokens, source
    );
    Ok(())
}
