//! Resolve Command
//!
//! Resolves a model chain from the configured operator chains, with operator
//! keys taken from the usual provider environment variables.
//!
//! Usage:
//!   chainsift resolve --tier pro [--byok] [--custom-models] [--identity acct-1]

use std::sync::Arc;

use tracing::debug;

use super::pricing_cache;
use crate::ai::{ConfigChain, ConfigResolver, MemoryChainStore, MemoryKeyStore, ProviderRegistry};
use crate::config::ConfigLoader;
use crate::types::{CallerId, Result, Tier};

/// Provider -> environment variable holding the operator key
const OPERATOR_KEY_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
];

pub struct ResolveArgs {
    pub tier: String,
    pub identity: String,
    pub byok: bool,
    pub custom_models: bool,
    pub format: String,
}

pub async fn run(args: ResolveArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let registry = ProviderRegistry::with_builtins();
    let pricing = pricing_cache(&config, registry.clone())?;

    let keys = MemoryKeyStore::new();
    for (provider, var) in OPERATOR_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            debug!(provider, "Operator key found in environment");
            keys.set_operator_key(provider, key);
        }
    }

    let resolver = ConfigResolver::new(
        registry,
        pricing,
        Arc::new(keys),
        Arc::new(MemoryChainStore::from_config(&config.chains)),
        config.resolver.clone(),
    );

    let chain = resolver
        .resolve(
            &CallerId::new(args.identity),
            &Tier::new(&args.tier),
            args.byok,
            args.custom_models,
            None,
        )
        .await?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&chain)?);
    } else {
        print_chain(&chain);
    }
    Ok(())
}

fn print_chain(chain: &ConfigChain) {
    println!(
        "Branch: {:?}  BYOK: {}  Models: {}",
        chain.branch(),
        chain.is_byok(),
        chain.len()
    );
    for attempt in chain.cursor() {
        let config = attempt.config;
        println!(
            "  {}/{}  {:<32} key={:?} max_out={} ctx={} strict_json={}",
            attempt.number,
            attempt.total,
            config.label(),
            config.key_source,
            config.max_output_tokens,
            config
                .context_length
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string()),
            config.strict_json,
        );
    }
}
