//! TTL Pricing Cache
//!
//! Refresh happens on access, not on a timer. When the current snapshot is
//! older than the refresh interval, one caller refreshes the whole table with
//! exponential backoff while concurrent readers keep using the old snapshot.
//!
//! ## Guarantees
//!
//! - Readers only clone an `Arc` under the read lock; a refresh in progress
//!   never blocks them.
//! - A successful refresh swaps the whole table at once.
//! - A failed refresh keeps serving the previous table. With no previous
//!   table, lookups return `None` instead of zero-valued entries.
//! - After a failed refresh, lookups skip refreshing until the cooldown
//!   passes. Callers that queued behind that refresh take its outcome.

use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{
    GenerationCostSource, PricingEntry, PricingError, PricingSource, PricingTable,
    fallback_estimate,
};
use crate::ai::provider::ProviderRegistry;
use crate::config::PricingConfig;
use crate::constants::pricing::CATALOGUE_PROVIDER;

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable pricing table plus the time it was loaded
#[derive(Debug)]
pub struct PricingSnapshot {
    table: PricingTable,
    loaded_at: Instant,
    fetched_at: DateTime<Utc>,
}

impl PricingSnapshot {
    fn new(table: PricingTable) -> Self {
        Self {
            table,
            loaded_at: Instant::now(),
            fetched_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, refresh_interval: Duration) -> bool {
        self.loaded_at.elapsed() > refresh_interval
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn provider_count(&self) -> usize {
        self.table.len()
    }

    pub fn model_count(&self) -> usize {
        self.table.values().map(|models| models.len()).sum()
    }

    /// Direct lookup, then the catalogue under `provider/model`
    pub fn lookup(&self, provider: &str, model: &str) -> Option<&PricingEntry> {
        let provider = provider.to_lowercase();
        self.table
            .get(&provider)
            .and_then(|models| models.get(model))
            .or_else(|| {
                if provider == CATALOGUE_PROVIDER {
                    return None;
                }
                self.table
                    .get(CATALOGUE_PROVIDER)
                    .and_then(|models| models.get(&format!("{}/{}", provider, model)))
            })
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Explicitly constructed pricing cache; no process-wide instance exists
pub struct PricingCache {
    source: Arc<dyn PricingSource>,
    generations: Option<Arc<dyn GenerationCostSource>>,
    operator_key: Option<SecretString>,
    registry: ProviderRegistry,
    snapshot: RwLock<Option<Arc<PricingSnapshot>>>,
    refresh_lock: Mutex<()>,
    failed_at: StdMutex<Option<Instant>>,
    refresh_interval: Duration,
    refresh_cooldown: Duration,
    refresh_backoff: ExponentialBuilder,
    generation_backoff: ConstantBuilder,
}

impl PricingCache {
    pub fn new(
        source: Arc<dyn PricingSource>,
        registry: ProviderRegistry,
        config: &PricingConfig,
    ) -> Self {
        let refresh_backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.retry_min_delay_ms))
            .with_max_delay(Duration::from_millis(config.retry_max_delay_ms))
            .with_factor(config.retry_backoff_factor)
            .with_max_times(config.refresh_retries);

        let generation_backoff = ConstantBuilder::default()
            .with_delay(Duration::from_millis(config.generation_retry_delay_ms))
            .with_max_times(config.generation_retries);

        Self {
            source,
            generations: None,
            operator_key: None,
            registry,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            failed_at: StdMutex::new(None),
            refresh_interval: config.refresh_interval(),
            refresh_cooldown: config.refresh_cooldown(),
            refresh_backoff,
            generation_backoff,
        }
    }

    /// Start from seed data instead of an empty table
    pub fn with_seed(self, table: PricingTable) -> Self {
        self.swap(table);
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_refresh_cooldown(mut self, refresh_cooldown: Duration) -> Self {
        self.refresh_cooldown = refresh_cooldown;
        self
    }

    /// Enable post-hoc cost lookups; `operator_key` is the last-resort credential
    pub fn with_generation_source(
        mut self,
        source: Arc<dyn GenerationCostSource>,
        operator_key: Option<SecretString>,
    ) -> Self {
        self.generations = Some(source);
        self.operator_key = operator_key;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn current(&self) -> Option<Arc<PricingSnapshot>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn last_failure(&self) -> Option<Instant> {
        match self.failed_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_last_failure(&self, at: Option<Instant>) {
        match self.failed_at.lock() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }

    /// A refresh failed after `since` or within the cooldown
    fn recently_failed(&self, since: Instant) -> bool {
        self.last_failure()
            .is_some_and(|at| at >= since || at.elapsed() < self.refresh_cooldown)
    }

    fn swap(&self, table: PricingTable) {
        let next = Some(Arc::new(PricingSnapshot::new(table)));
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Current snapshot, refreshing first when it is missing or stale
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> Option<Arc<PricingSnapshot>> {
        let current = self.current();
        if let Some(snapshot) = &current
            && !snapshot.is_stale(self.refresh_interval)
        {
            return current;
        }

        let asked_at = Instant::now();
        if self.recently_failed(asked_at) {
            debug!("Pricing refresh cooling down after failure");
            return current;
        }

        // With data in hand, don't queue behind another refresh
        let _guard = if current.is_some() {
            match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => return current,
            }
        } else {
            self.refresh_lock.lock().await
        };

        // Another caller may have refreshed, or failed to, while we waited
        let latest = self.current();
        if let Some(snapshot) = &latest
            && !snapshot.is_stale(self.refresh_interval)
        {
            return latest;
        }
        if self.recently_failed(asked_at) {
            return latest;
        }

        match self.refresh().await {
            Ok(()) => self.current(),
            Err(err) => {
                if latest.is_some() {
                    warn!(error = %err, "Pricing refresh failed, serving stale table");
                } else {
                    warn!(error = %err, "Pricing refresh failed and no table is loaded");
                }
                latest
            }
        }
    }

    /// Fetch the full table with backoff and swap it in
    ///
    /// Always fetches; the failure cooldown only applies to [`Self::snapshot`].
    pub async fn refresh(&self) -> std::result::Result<(), PricingError> {
        let fetch = || async { self.source.fetch_table().await };

        let table = fetch
            .retry(self.refresh_backoff)
            .notify(|err: &PricingError, delay: Duration| {
                debug!(error = %err, delay_ms = delay.as_millis() as u64, "Retrying pricing refresh");
            })
            .await
            .inspect_err(|_| self.set_last_failure(Some(Instant::now())))?;

        let models: usize = table.values().map(|m| m.len()).sum();
        self.swap(table);
        self.set_last_failure(None);
        info!(models, "Pricing table refreshed");
        Ok(())
    }

    /// Pricing for a model; `None` when unknown or when no table was ever loaded
    pub async fn get_pricing(&self, provider: &str, model: &str) -> Option<PricingEntry> {
        self.snapshot()
            .await
            .and_then(|snapshot| snapshot.lookup(provider, model).cloned())
    }

    pub async fn has_data(&self) -> bool {
        self.snapshot().await.is_some()
    }

    /// Age of the loaded table without triggering a refresh
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.current().map(|s| s.loaded_at.elapsed())
    }

    pub fn is_stale(&self) -> bool {
        self.current()
            .is_none_or(|s| s.is_stale(self.refresh_interval))
    }

    /// Estimated USD cost: cached prices, then the provider's own estimator,
    /// then the per-family table
    pub async fn estimate_cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        if let Some(entry) = self.get_pricing(provider, model).await {
            return entry.cost(input_tokens, output_tokens);
        }

        if let Some(cost) =
            self.registry
                .native_estimate(provider, model, input_tokens, output_tokens)
        {
            return cost;
        }

        debug!(provider, model, "No cached pricing, using family fallback");
        fallback_estimate(model, input_tokens, output_tokens)
    }

    /// Billed cost of a generation, retrying while usage data is not visible yet
    ///
    /// Prefers the key that made the call; the operator key is a fallback and
    /// using it points at a resolution gap upstream.
    #[instrument(skip(self, api_key))]
    pub async fn actual_cost(
        &self,
        provider: &str,
        generation_id: &str,
        api_key: Option<&SecretString>,
    ) -> std::result::Result<f64, PricingError> {
        let source = self
            .generations
            .as_ref()
            .filter(|s| s.provider().eq_ignore_ascii_case(provider))
            .ok_or_else(|| PricingError::UnsupportedProvider(provider.to_string()))?;

        let key = match api_key.filter(|k| !secret_is_empty(k)) {
            Some(key) => key,
            None => {
                let key = self
                    .operator_key
                    .as_ref()
                    .filter(|k| !secret_is_empty(k))
                    .ok_or(PricingError::MissingApiKey)?;
                warn!(
                    provider,
                    generation_id, "No caller key for cost lookup, falling back to operator key"
                );
                key
            }
        };

        let lookup = || async { source.generation_cost(generation_id, key).await };

        lookup
            .retry(self.generation_backoff)
            .when(PricingError::is_not_found)
            .notify(|err: &PricingError, delay: Duration| {
                debug!(error = %err, delay_ms = delay.as_millis() as u64, "Generation cost not ready");
            })
            .await
    }
}

fn secret_is_empty(secret: &SecretString) -> bool {
    use secrecy::ExposeSecret;
    secret.expose_secret().trim().is_empty()
}

impl std::fmt::Debug for PricingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingCache")
            .field("refresh_interval", &self.refresh_interval)
            .field("refresh_cooldown", &self.refresh_cooldown)
            .field("loaded", &self.current().is_some())
            .field("operator_key", &self.operator_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn fast_config() -> PricingConfig {
        PricingConfig {
            retry_min_delay_ms: 1,
            retry_max_delay_ms: 2,
            generation_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn table_with(provider: &str, model: &str, prompt: f64, completion: f64) -> PricingTable {
        let mut models = HashMap::new();
        models.insert(
            model.to_string(),
            PricingEntry {
                model_id: model.to_string(),
                prompt_price_per_token: prompt,
                completion_price_per_token: completion,
                context_length: Some(128_000),
                max_completion_tokens: Some(16_384),
                is_free: false,
                capabilities: Vec::new(),
            },
        );
        let mut table = PricingTable::new();
        table.insert(provider.to_string(), models);
        table
    }

    /// Fails the first `failures` fetches, then serves its table
    struct MockSource {
        calls: AtomicU32,
        failures: u32,
        table: PricingTable,
    }

    impl MockSource {
        fn new(failures: u32, table: PricingTable) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                table,
            }
        }

        fn always_failing() -> Self {
            Self::new(u32::MAX, PricingTable::new())
        }
    }

    #[async_trait]
    impl PricingSource for MockSource {
        async fn fetch_table(&self) -> std::result::Result<PricingTable, PricingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PricingError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(self.table.clone())
        }
    }

    #[tokio::test]
    async fn test_refresh_on_first_access() {
        let source = Arc::new(MockSource::new(0, table_with("openai", "gpt-4o", 1e-6, 2e-6)));
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config());

        let entry = cache.get_pricing("openai", "gpt-4o").await.unwrap();
        assert_eq!(entry.context_length, Some(128_000));

        // Fresh table: no second fetch
        cache.get_pricing("openai", "gpt-4o").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_retries_then_succeeds() {
        let source = Arc::new(MockSource::new(2, table_with("openai", "gpt-4o", 1e-6, 2e-6)));
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config());

        assert!(cache.get_pricing("openai", "gpt-4o").await.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_three_retries() {
        let source = Arc::new(MockSource::always_failing());
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config());

        assert!(cache.refresh().await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_outage_on_cold_cache_fetches_once_per_cooldown() {
        let source = Arc::new(MockSource::always_failing());
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config());

        for _ in 0..3 {
            assert!(cache.get_pricing("openai", "gpt-4o").await.is_none());
        }
        assert!(!cache.has_data().await);

        // One initial attempt plus three retries, then the cooldown holds
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_outage_on_stale_cache_fetches_once_per_cooldown() {
        let source = Arc::new(MockSource::always_failing());
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config())
            .with_seed(table_with("openai", "gpt-4o", 1e-6, 2e-6))
            .with_refresh_interval(Duration::from_nanos(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        for _ in 0..3 {
            assert!(cache.get_pricing("openai", "gpt-4o").await.is_some());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_refresh_resumes_after_cooldown() {
        let source = Arc::new(MockSource::new(4, table_with("openai", "gpt-4o", 1e-6, 2e-6)));
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config())
            .with_refresh_cooldown(Duration::from_millis(20));

        assert!(cache.get_pricing("openai", "gpt-4o").await.is_none());
        assert!(cache.get_pricing("openai", "gpt-4o").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get_pricing("openai", "gpt-4o").await.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cold_waiters_share_failed_refresh() {
        let source = Arc::new(MockSource::always_failing());
        let cache = PricingCache::new(source.clone(), ProviderRegistry::new(), &fast_config())
            .with_refresh_cooldown(Duration::ZERO);

        let (a, b, c) = tokio::join!(
            cache.get_pricing("openai", "gpt-4o"),
            cache.get_pricing("openai", "gpt-4o"),
            cache.get_pricing("anthropic", "claude-3-haiku"),
        );

        assert!(a.is_none() && b.is_none() && c.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failure_without_prior_data_returns_none() {
        let cache = PricingCache::new(
            Arc::new(MockSource::always_failing()),
            ProviderRegistry::new(),
            &fast_config(),
        );

        assert!(cache.get_pricing("openai", "gpt-4o").await.is_none());
        assert!(!cache.has_data().await);
        assert!(cache.snapshot_age().is_none());
    }

    #[tokio::test]
    async fn test_failure_with_stale_data_serves_stale_entries() {
        let seed = table_with("openai", "gpt-4o", 1e-6, 2e-6);
        let cache = PricingCache::new(
            Arc::new(MockSource::always_failing()),
            ProviderRegistry::new(),
            &fast_config(),
        )
        .with_seed(seed.clone())
        .with_refresh_interval(Duration::from_nanos(1));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.is_stale());

        let entry = cache.get_pricing("openai", "gpt-4o").await.unwrap();
        assert_eq!(&entry, &seed["openai"]["gpt-4o"]);
    }

    #[tokio::test]
    async fn test_catalogue_cross_lookup() {
        let cache = PricingCache::new(
            Arc::new(MockSource::always_failing()),
            ProviderRegistry::new(),
            &fast_config(),
        )
        .with_seed(table_with(CATALOGUE_PROVIDER, "anthropic/claude-3-haiku", 1e-6, 1e-6));

        assert!(cache.get_pricing("anthropic", "claude-3-haiku").await.is_some());
        assert!(cache.get_pricing("openai", "claude-3-haiku").await.is_none());
    }

    #[tokio::test]
    async fn test_estimate_cost_precedence() {
        let cache = PricingCache::new(
            Arc::new(MockSource::always_failing()),
            ProviderRegistry::with_builtins(),
            &fast_config(),
        )
        .with_seed(table_with("openai", "gpt-4o", 0.000_01, 0.000_02));

        // (a) cached pricing
        let cached = cache.estimate_cost("openai", "gpt-4o", 1000, 1000).await;
        assert!((cached - 0.03).abs() < 1e-12);

        // (b) provider-native estimator
        let native = cache.estimate_cost("ollama", "llama3.1", 1000, 1000).await;
        assert_eq!(native, 0.0);

        // (c) family table
        let family = cache
            .estimate_cost("anthropic", "claude-3-opus", 1_000_000, 0)
            .await;
        assert!((family - 15.0).abs() < 1e-9);
    }

    /// Returns not-found for the first `pending` lookups
    struct MockGenerations {
        calls: AtomicU32,
        pending: u32,
        hard_fail: AtomicBool,
        last_key: std::sync::Mutex<Option<String>>,
    }

    impl MockGenerations {
        fn new(pending: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                pending,
                hard_fail: AtomicBool::new(false),
                last_key: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GenerationCostSource for MockGenerations {
        fn provider(&self) -> &str {
            "openrouter"
        }

        async fn generation_cost(
            &self,
            generation_id: &str,
            api_key: &SecretString,
        ) -> std::result::Result<f64, PricingError> {
            use secrecy::ExposeSecret;
            *self.last_key.lock().unwrap() = Some(api_key.expose_secret().to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hard_fail.load(Ordering::SeqCst) {
                return Err(PricingError::Status {
                    status: 401,
                    body: "unauthorized".to_string(),
                });
            }
            if call < self.pending {
                return Err(PricingError::GenerationNotFound(generation_id.to_string()));
            }
            Ok(0.042)
        }
    }

    fn cache_with_generations(
        generations: Arc<MockGenerations>,
        operator_key: Option<&str>,
    ) -> PricingCache {
        PricingCache::new(
            Arc::new(MockSource::always_failing()),
            ProviderRegistry::new(),
            &fast_config(),
        )
        .with_generation_source(generations, operator_key.map(SecretString::from))
    }

    #[tokio::test]
    async fn test_actual_cost_retries_not_found() {
        let generations = Arc::new(MockGenerations::new(2));
        let cache = cache_with_generations(generations.clone(), None);

        let key = SecretString::from("sk-caller");
        let cost = cache
            .actual_cost("openrouter", "gen-1", Some(&key))
            .await
            .unwrap();
        assert!((cost - 0.042).abs() < 1e-12);
        assert_eq!(generations.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_actual_cost_gives_up_after_retries() {
        let generations = Arc::new(MockGenerations::new(100));
        let cache = cache_with_generations(generations.clone(), None);

        let key = SecretString::from("sk-caller");
        let err = cache
            .actual_cost("openrouter", "gen-1", Some(&key))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(generations.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_actual_cost_other_errors_not_retried() {
        let generations = Arc::new(MockGenerations::new(0));
        generations.hard_fail.store(true, Ordering::SeqCst);
        let cache = cache_with_generations(generations.clone(), None);

        let key = SecretString::from("sk-caller");
        let err = cache
            .actual_cost("openrouter", "gen-1", Some(&key))
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::Status { status: 401, .. }));
        assert_eq!(generations.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_actual_cost_prefers_caller_key() {
        let generations = Arc::new(MockGenerations::new(0));
        let cache = cache_with_generations(generations.clone(), Some("sk-operator"));

        let key = SecretString::from("sk-caller");
        cache
            .actual_cost("openrouter", "gen-1", Some(&key))
            .await
            .unwrap();
        assert_eq!(
            generations.last_key.lock().unwrap().as_deref(),
            Some("sk-caller")
        );

        let blank = SecretString::from("  ");
        cache
            .actual_cost("openrouter", "gen-2", Some(&blank))
            .await
            .unwrap();
        assert_eq!(
            generations.last_key.lock().unwrap().as_deref(),
            Some("sk-operator")
        );
    }

    #[tokio::test]
    async fn test_actual_cost_requires_key() {
        let cache = cache_with_generations(Arc::new(MockGenerations::new(0)), None);
        let err = cache.actual_cost("openrouter", "gen-1", None).await.unwrap_err();
        assert!(matches!(err, PricingError::MissingApiKey));

        let err = cache.actual_cost("openai", "gen-1", None).await.unwrap_err();
        assert!(matches!(err, PricingError::UnsupportedProvider(_)));
    }
}
