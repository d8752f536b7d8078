//! Config Resolver
//!
//! Walks the resolution matrix, fills dynamic token limits from the pricing
//! cache and provider registry, and drops entries that have no usable
//! credential.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use super::{
    CandidateConfig, ChainEntry, ChainStore, ConfigChain, KeySource, KeyStore, OverrideEntry,
    ResolutionBranch,
};
use crate::ai::pricing::PricingCache;
use crate::ai::provider::ProviderRegistry;
use crate::ai::tokenizer::estimate_tokens;
use crate::config::ResolverConfig;
use crate::types::{CallerId, ChainsiftError, Result, Tier};

/// Capability advertised by catalogue entries that honour JSON-schema output
const STRUCTURED_OUTPUTS: &str = "structured_outputs";

/// Which credentials an entry may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyPolicy {
    Caller,
    Operator,
    CallerThenOperator,
}

pub struct ConfigResolver {
    registry: ProviderRegistry,
    pricing: Arc<PricingCache>,
    keys: Arc<dyn KeyStore>,
    chains: Arc<dyn ChainStore>,
    config: ResolverConfig,
}

impl ConfigResolver {
    pub fn new(
        registry: ProviderRegistry,
        pricing: Arc<PricingCache>,
        keys: Arc<dyn KeyStore>,
        chains: Arc<dyn ChainStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            registry,
            pricing,
            keys,
            chains,
            config,
        }
    }

    /// Resolve an ordered candidate chain for one request
    ///
    /// Returns `NoModelsConfigured` when every applicable branch is empty
    /// after dropping entries without credentials.
    #[instrument(skip(self, identity, tier, override_chain), fields(identity = %identity, tier = %tier))]
    pub async fn resolve(
        &self,
        identity: &CallerId,
        tier: &Tier,
        byok_allowed: bool,
        models_custom_allowed: bool,
        override_chain: Option<&[OverrideEntry]>,
    ) -> Result<ConfigChain> {
        // 1. Explicit override
        if let Some(entries) = override_chain {
            if byok_allowed {
                let configs = self.build_override(identity, entries).await?;
                if !configs.is_empty() {
                    return Ok(self.finish(configs, ResolutionBranch::Override));
                }
                debug!("Override produced no usable candidates");
            } else {
                debug!("Ignoring chain override, BYOK not allowed");
            }
        }

        // 2. BYOK + custom models
        if byok_allowed && models_custom_allowed {
            let entries = self.chains.caller_chain(identity).await?;
            let configs = self
                .build_chain(identity, &entries, KeyPolicy::Caller)
                .await?;
            if !configs.is_empty() {
                return Ok(self.finish(configs, ResolutionBranch::CallerChainCallerKeys));
            }
        }

        // 3. Custom models only
        if models_custom_allowed && !byok_allowed {
            let entries = self.chains.caller_chain(identity).await?;
            let configs = self
                .build_chain(identity, &entries, KeyPolicy::Operator)
                .await?;
            if !configs.is_empty() {
                return Ok(self.finish(configs, ResolutionBranch::CallerChainOperatorKeys));
            }
        }

        let tier_entries = self.tier_chain(tier).await?;

        // 4. BYOK only
        if byok_allowed && !models_custom_allowed {
            let configs = self
                .build_chain(identity, &tier_entries, KeyPolicy::CallerThenOperator)
                .await?;
            if !configs.is_empty() {
                return Ok(self.finish(configs, ResolutionBranch::TierChainCallerKeys));
            }
        }

        // 5. Default
        let configs = self
            .build_chain(identity, &tier_entries, KeyPolicy::Operator)
            .await?;
        if !configs.is_empty() {
            return Ok(self.finish(configs, ResolutionBranch::TierChainOperatorKeys));
        }

        warn!("No usable models in any resolution branch");
        Err(ChainsiftError::NoModelsConfigured {
            tier: tier.to_string(),
        })
    }

    fn finish(&self, configs: Vec<CandidateConfig>, branch: ResolutionBranch) -> ConfigChain {
        let chain = ConfigChain::new(configs, branch);
        info!(
            branch = ?chain.branch(),
            candidates = chain.len(),
            byok = chain.is_byok(),
            "Resolved model chain"
        );
        chain
    }

    /// Tier chain, then the untiered default, then the free tier
    async fn tier_chain(&self, tier: &Tier) -> Result<Vec<ChainEntry>> {
        let entries = self.chains.tier_chain(tier).await?;
        if !entries.is_empty() {
            return Ok(entries);
        }

        let entries = self.chains.default_chain().await?;
        if !entries.is_empty() {
            debug!(tier = %tier, "No tier chain, using default chain");
            return Ok(entries);
        }

        let free = Tier::new(&self.config.free_tier);
        debug!(tier = %tier, free_tier = %free, "No default chain, using free tier chain");
        self.chains.tier_chain(&free).await
    }

    async fn build_override(
        &self,
        identity: &CallerId,
        entries: &[OverrideEntry],
    ) -> Result<Vec<CandidateConfig>> {
        let mut configs = Vec::with_capacity(entries.len());
        for item in entries {
            let explicit = item
                .api_key
                .clone()
                .filter(|k| !k.expose_secret().trim().is_empty());

            let credential = match explicit {
                Some(key) => Some((Some(key), KeySource::Caller)),
                None => {
                    self.credential(identity, &item.entry.provider, KeyPolicy::Caller)
                        .await?
                }
            };

            match credential {
                Some((key, source)) => {
                    configs.push(self.build_candidate(&item.entry, key, source).await);
                }
                None => debug!(
                    provider = %item.entry.provider,
                    model = %item.entry.model,
                    "Dropping override entry without key"
                ),
            }
        }
        Ok(configs)
    }

    async fn build_chain(
        &self,
        identity: &CallerId,
        entries: &[ChainEntry],
        policy: KeyPolicy,
    ) -> Result<Vec<CandidateConfig>> {
        let mut configs = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.credential(identity, &entry.provider, policy).await? {
                Some((key, source)) => {
                    configs.push(self.build_candidate(entry, key, source).await);
                }
                None => debug!(
                    provider = %entry.provider,
                    model = %entry.model,
                    ?policy,
                    "Dropping chain entry without key"
                ),
            }
        }
        Ok(configs)
    }

    /// `None` means the entry has no usable credential and must be dropped
    async fn credential(
        &self,
        identity: &CallerId,
        provider: &str,
        policy: KeyPolicy,
    ) -> Result<Option<(Option<SecretString>, KeySource)>> {
        if !self.registry.requires_auth(provider) {
            return Ok(Some((None, KeySource::NoAuth)));
        }

        if matches!(policy, KeyPolicy::Caller | KeyPolicy::CallerThenOperator)
            && let Some(key) = self.keys.caller_key(identity, provider).await?
        {
            return Ok(Some((Some(key), KeySource::Caller)));
        }

        if matches!(policy, KeyPolicy::Operator | KeyPolicy::CallerThenOperator)
            && let Some(key) = self.keys.operator_key(provider).await?
        {
            return Ok(Some((Some(key), KeySource::Operator)));
        }

        Ok(None)
    }

    async fn build_candidate(
        &self,
        entry: &ChainEntry,
        api_key: Option<SecretString>,
        key_source: KeySource,
    ) -> CandidateConfig {
        let pricing = self.pricing.get_pricing(&entry.provider, &entry.model).await;
        let limits = self.registry.model_limits(&entry.provider, &entry.model);

        let context_length = entry
            .context_length
            .or_else(|| pricing.as_ref().and_then(|p| p.context_length))
            .or(limits.map(|l| l.context_length));

        let max_output_tokens = match entry.max_output_tokens {
            Some(pinned) => pinned,
            None => {
                let reported = pricing
                    .as_ref()
                    .and_then(|p| p.max_completion_tokens)
                    .or(limits.map(|l| l.max_output_tokens));
                self.clamp_output_tokens(reported, context_length)
            }
        };

        let strict_json = entry.strict_json.unwrap_or_else(|| {
            pricing
                .as_ref()
                .is_some_and(|p| p.has_capability(STRUCTURED_OUTPUTS))
                || self
                    .registry
                    .get(&entry.provider)
                    .is_some_and(|p| p.supports_strict_json(&entry.model))
        });

        let base_url = entry.base_url.clone().or_else(|| {
            self.registry
                .get(&entry.provider)
                .and_then(|p| p.default_base_url().map(str::to_string))
        });

        CandidateConfig {
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            api_key,
            key_source,
            base_url,
            max_output_tokens,
            context_length,
            strict_json,
        }
    }

    /// Cap a reported completion limit so input plus output still fits
    ///
    /// Some catalogue entries report a completion limit equal to the context
    /// length; using it as-is leaves no room for input.
    pub fn clamp_output_tokens(&self, reported: Option<u32>, context_length: Option<u32>) -> u32 {
        let tokens = reported
            .unwrap_or(self.config.default_max_output_tokens)
            .min(self.config.max_output_tokens_ceiling);

        match context_length {
            Some(ctx) if ctx > 0 && tokens >= ctx => ctx / 2,
            _ => tokens,
        }
    }

    /// Fail fast when the input would not fit the model's context window
    ///
    /// Unknown context lengths pass.
    pub fn validate_context_capacity(
        &self,
        config: &CandidateConfig,
        input_tokens: u64,
    ) -> Result<()> {
        check_context_capacity(config, input_tokens, self.config.context_capacity_ratio)
    }

    /// [`Self::validate_context_capacity`] on raw input text
    pub fn validate_input(&self, config: &CandidateConfig, input: &str) -> Result<()> {
        self.validate_context_capacity(config, estimate_tokens(input))
    }
}

/// Shared by the resolver and the page extractor
pub(crate) fn check_context_capacity(
    config: &CandidateConfig,
    input_tokens: u64,
    ratio: f64,
) -> Result<()> {
    let Some(context_length) = config.context_length else {
        return Ok(());
    };

    let limit_tokens = (context_length as f64 * ratio).floor() as u64;
    if input_tokens > limit_tokens {
        return Err(ChainsiftError::ContextCapacity {
            provider: config.provider.clone(),
            model: config.model.clone(),
            input_tokens,
            limit_tokens,
            context_length: context_length as u64,
            pct: (ratio * 100.0).round() as u8,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::pricing::{PricingEntry, PricingError, PricingSource, PricingTable};
    use crate::ai::resolver::{MemoryChainStore, MemoryKeyStore};
    use crate::config::PricingConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NoSource;

    #[async_trait]
    impl PricingSource for NoSource {
        async fn fetch_table(&self) -> std::result::Result<PricingTable, PricingError> {
            Err(PricingError::NoData)
        }
    }

    fn pricing_with(entries: Vec<(&str, &str, Option<u32>, Option<u32>)>) -> Arc<PricingCache> {
        let mut table = PricingTable::new();
        for (provider, model, context_length, max_completion_tokens) in entries {
            table.entry(provider.to_string()).or_insert_with(HashMap::new).insert(
                model.to_string(),
                PricingEntry {
                    model_id: model.to_string(),
                    prompt_price_per_token: 0.000_001,
                    completion_price_per_token: 0.000_002,
                    context_length,
                    max_completion_tokens,
                    is_free: false,
                    capabilities: Vec::new(),
                },
            );
        }

        let config = PricingConfig {
            retry_min_delay_ms: 1,
            retry_max_delay_ms: 1,
            refresh_retries: 0,
            ..Default::default()
        };
        Arc::new(
            PricingCache::new(Arc::new(NoSource), ProviderRegistry::with_builtins(), &config)
                .with_seed(table),
        )
    }

    struct Fixture {
        keys: Arc<MemoryKeyStore>,
        chains: Arc<MemoryChainStore>,
        caller: CallerId,
        tier: Tier,
    }

    impl Fixture {
        /// Operator keys for openai and anthropic, a "pro" tier chain, and a
        /// caller chain on anthropic
        fn new() -> Self {
            let keys = Arc::new(
                MemoryKeyStore::new()
                    .with_operator_key("openai", "sk-op-openai")
                    .with_operator_key("anthropic", "sk-op-anthropic"),
            );

            let chains = Arc::new(MemoryChainStore::new().with_default_chain(vec![
                ChainEntry::new("openai", "gpt-4o-mini"),
            ]));
            let tier = Tier::new("pro");
            chains.set_tier_chain(
                &tier,
                vec![
                    ChainEntry::new("openai", "gpt-4o"),
                    ChainEntry::new("anthropic", "claude-3-5-haiku-latest"),
                ],
            );

            let caller = CallerId::from("user-1");
            chains.set_caller_chain(
                &caller,
                vec![ChainEntry::new("anthropic", "claude-3-opus-latest")],
            );

            Self {
                keys,
                chains,
                caller,
                tier,
            }
        }

        fn resolver(&self) -> ConfigResolver {
            self.resolver_with(pricing_with(Vec::new()))
        }

        fn resolver_with(&self, pricing: Arc<PricingCache>) -> ConfigResolver {
            ConfigResolver::new(
                ProviderRegistry::with_builtins(),
                pricing,
                self.keys.clone(),
                self.chains.clone(),
                ResolverConfig::default(),
            )
        }
    }

    fn secret(config: &CandidateConfig) -> Option<String> {
        config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
    }

    // -------------------------------------------------------------------------
    // Resolution matrix
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_default_branch_uses_operator_keys() {
        let fx = Fixture::new();
        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, false, false, None)
            .await
            .unwrap();

        assert_eq!(chain.branch(), ResolutionBranch::TierChainOperatorKeys);
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_byok());
        assert_eq!(secret(&chain.configs()[0]).as_deref(), Some("sk-op-openai"));
    }

    #[tokio::test]
    async fn test_byok_and_custom_uses_caller_chain_and_keys() {
        let fx = Fixture::new();
        fx.keys.set_caller_key(&fx.caller, "anthropic", "sk-user-anthropic");

        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, true, true, None)
            .await
            .unwrap();

        assert_eq!(chain.branch(), ResolutionBranch::CallerChainCallerKeys);
        assert_eq!(chain.configs()[0].model, "claude-3-opus-latest");
        assert_eq!(secret(&chain.configs()[0]).as_deref(), Some("sk-user-anthropic"));
        assert!(chain.is_byok());
    }

    #[tokio::test]
    async fn test_byok_and_custom_without_caller_keys_falls_to_default() {
        let fx = Fixture::new();
        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, true, true, None)
            .await
            .unwrap();

        assert_eq!(chain.branch(), ResolutionBranch::TierChainOperatorKeys);
    }

    #[tokio::test]
    async fn test_custom_only_uses_caller_chain_with_operator_keys() {
        let fx = Fixture::new();
        fx.keys.set_caller_key(&fx.caller, "anthropic", "sk-user-anthropic");

        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, false, true, None)
            .await
            .unwrap();

        assert_eq!(chain.branch(), ResolutionBranch::CallerChainOperatorKeys);
        assert_eq!(chain.configs()[0].model, "claude-3-opus-latest");
        assert_eq!(secret(&chain.configs()[0]).as_deref(), Some("sk-op-anthropic"));
        assert!(!chain.is_byok());
    }

    #[tokio::test]
    async fn test_byok_only_substitutes_caller_keys() {
        let fx = Fixture::new();
        fx.keys.set_caller_key(&fx.caller, "openai", "sk-user-openai");

        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, true, false, None)
            .await
            .unwrap();

        assert_eq!(chain.branch(), ResolutionBranch::TierChainCallerKeys);
        let [openai, anthropic] = chain.configs() else {
            panic!("expected two candidates");
        };
        assert_eq!(openai.key_source, KeySource::Caller);
        assert_eq!(secret(openai).as_deref(), Some("sk-user-openai"));
        assert_eq!(anthropic.key_source, KeySource::Operator);
        // One operator key in the chain means the caller is billed
        assert!(!chain.is_byok());
    }

    #[tokio::test]
    async fn test_override_requires_byok() {
        let fx = Fixture::new();
        let over = [OverrideEntry::new(ChainEntry::new("openai", "o3-mini")).with_api_key("sk-ov")];

        let ignored = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, false, false, Some(&over))
            .await
            .unwrap();
        assert_eq!(ignored.branch(), ResolutionBranch::TierChainOperatorKeys);

        let honored = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, true, false, Some(&over))
            .await
            .unwrap();
        assert_eq!(honored.branch(), ResolutionBranch::Override);
        assert_eq!(honored.configs()[0].model, "o3-mini");
        assert_eq!(secret(&honored.configs()[0]).as_deref(), Some("sk-ov"));
        assert!(honored.is_byok());
    }

    #[tokio::test]
    async fn test_entries_without_keys_are_dropped() {
        let fx = Fixture::new();
        fx.chains.set_tier_chain(
            &fx.tier,
            vec![
                ChainEntry::new("mystery", "m1"),
                ChainEntry::new("ollama", "llama3.1"),
                ChainEntry::new("openai", "gpt-4o"),
            ],
        );

        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, false, false, None)
            .await
            .unwrap();

        let providers: Vec<&str> = chain.configs().iter().map(|c| c.provider.as_str()).collect();
        assert_eq!(providers, vec!["ollama", "openai"]);
        assert_eq!(chain.configs()[0].key_source, KeySource::NoAuth);
        assert!(chain.configs()[0].api_key.is_none());
    }

    #[tokio::test]
    async fn test_no_usable_models_is_explicit_error() {
        let keys = Arc::new(MemoryKeyStore::new());
        let chains = Arc::new(MemoryChainStore::from_config(&crate::config::ChainsConfig::default()));
        let resolver = ConfigResolver::new(
            ProviderRegistry::with_builtins(),
            pricing_with(Vec::new()),
            keys,
            chains,
            ResolverConfig::default(),
        );

        let err = resolver
            .resolve(&CallerId::from("u"), &Tier::new("pro"), true, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainsiftError::NoModelsConfigured { ref tier } if tier == "pro"));
    }

    // -------------------------------------------------------------------------
    // Tier fallback
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_unknown_tier_uses_default_chain() {
        let fx = Fixture::new();
        let chain = fx
            .resolver()
            .resolve(&fx.caller, &Tier::new("enterprise"), false, false, None)
            .await
            .unwrap();
        assert_eq!(chain.configs()[0].model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_free_tier_is_last_resort() {
        let keys = Arc::new(MemoryKeyStore::new().with_operator_key("openrouter", "sk-or"));
        let chains = Arc::new(MemoryChainStore::new());
        chains.set_tier_chain(
            &Tier::new("free"),
            vec![ChainEntry::new("openrouter", "meta-llama/llama-3.3-70b-instruct:free")],
        );
        let resolver = ConfigResolver::new(
            ProviderRegistry::with_builtins(),
            pricing_with(Vec::new()),
            keys,
            chains,
            ResolverConfig::default(),
        );

        let chain = resolver
            .resolve(&CallerId::from("u"), &Tier::new("pro"), false, false, None)
            .await
            .unwrap();
        assert_eq!(chain.configs()[0].provider, "openrouter");
    }

    // -------------------------------------------------------------------------
    // Dynamic fields
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_completion_limit_equal_to_context_is_clamped() {
        let fx = Fixture::new();
        fx.chains.set_tier_chain(
            &fx.tier,
            vec![
                ChainEntry::new("openai", "gpt-small"),
                ChainEntry::new("openai", "gpt-huge"),
            ],
        );
        let pricing = pricing_with(vec![
            ("openai", "gpt-small", Some(8192), Some(8192)),
            ("openai", "gpt-huge", Some(200_000), Some(200_000)),
        ]);

        let chain = fx
            .resolver_with(pricing)
            .resolve(&fx.caller, &fx.tier, false, false, None)
            .await
            .unwrap();

        let small = &chain.configs()[0];
        assert_eq!(small.context_length, Some(8192));
        assert_eq!(small.max_output_tokens, 4096);

        let huge = &chain.configs()[1];
        assert_eq!(huge.max_output_tokens, 16_384);
        assert_ne!(huge.max_output_tokens, 200_000);
    }

    #[tokio::test]
    async fn test_explicit_pin_wins() {
        let fx = Fixture::new();
        fx.chains.set_tier_chain(
            &fx.tier,
            vec![ChainEntry::new("openai", "gpt-4o")
                .with_max_output_tokens(1024)
                .with_context_length(32_000)],
        );
        let pricing = pricing_with(vec![("openai", "gpt-4o", Some(128_000), Some(16_384))]);

        let chain = fx
            .resolver_with(pricing)
            .resolve(&fx.caller, &fx.tier, false, false, None)
            .await
            .unwrap();

        let config = &chain.configs()[0];
        assert_eq!(config.max_output_tokens, 1024);
        assert_eq!(config.context_length, Some(32_000));
    }

    #[tokio::test]
    async fn test_registry_limits_fill_gaps() {
        let fx = Fixture::new();
        let chain = fx
            .resolver()
            .resolve(&fx.caller, &fx.tier, false, false, None)
            .await
            .unwrap();

        let gpt = &chain.configs()[0];
        assert_eq!(gpt.context_length, Some(128_000));
        assert_eq!(gpt.max_output_tokens, 16_384);
        assert!(gpt.strict_json);
        assert_eq!(gpt.base_url.as_deref(), Some("https://api.openai.com/v1"));
    }

    #[test]
    fn test_clamp_without_context_uses_default_and_ceiling() {
        let fx = Fixture::new();
        let resolver = fx.resolver();
        assert_eq!(resolver.clamp_output_tokens(None, None), 4096);
        assert_eq!(resolver.clamp_output_tokens(Some(100_000), None), 16_384);
        assert_eq!(resolver.clamp_output_tokens(Some(2048), Some(4096)), 2048);
    }

    // -------------------------------------------------------------------------
    // Context capacity
    // -------------------------------------------------------------------------

    #[test]
    fn test_context_capacity_check() {
        let fx = Fixture::new();
        let resolver = fx.resolver();
        let config = CandidateConfig::new("openai", "gpt-4").with_context_length(10_000);

        assert!(resolver.validate_context_capacity(&config, 8_000).is_ok());

        let err = resolver
            .validate_context_capacity(&config, 8_001)
            .unwrap_err();
        match err {
            ChainsiftError::ContextCapacity {
                limit_tokens, pct, ..
            } => {
                assert_eq!(limit_tokens, 8_000);
                assert_eq!(pct, 80);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err_category_is_model(&resolver, &config));

        let unknown = CandidateConfig::new("openai", "gpt-x");
        assert!(resolver.validate_context_capacity(&unknown, u64::MAX).is_ok());
    }

    fn err_category_is_model(resolver: &ConfigResolver, config: &CandidateConfig) -> bool {
        let input = "x".repeat(40_004);
        resolver
            .validate_input(config, &input)
            .is_err_and(|e| e.category() == crate::types::ErrorCategory::ModelError)
    }
}
