//! Credential and Chain Stores
//!
//! Persistence and decryption live behind these traits. The in-memory
//! implementations back the CLI and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};

use super::ChainEntry;
use crate::config::ChainsConfig;
use crate::types::{CallerId, Result, Tier};

/// Decrypted per-provider credentials
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Caller-owned key for a provider
    async fn caller_key(&self, caller: &CallerId, provider: &str) -> Result<Option<SecretString>>;

    /// Operator-owned key for a provider
    async fn operator_key(&self, provider: &str) -> Result<Option<SecretString>>;
}

/// Saved model chains
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Caller's own saved chain, empty if none
    async fn caller_chain(&self, caller: &CallerId) -> Result<Vec<ChainEntry>>;

    /// Operator chain for exactly this tier, empty if none
    async fn tier_chain(&self, tier: &Tier) -> Result<Vec<ChainEntry>>;

    /// Operator chain that applies to every tier without its own
    async fn default_chain(&self) -> Result<Vec<ChainEntry>>;
}

fn non_empty(key: SecretString) -> Option<SecretString> {
    (!key.expose_secret().trim().is_empty()).then_some(key)
}

// =============================================================================
// In-Memory Key Store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    caller: DashMap<(String, String), SecretString>,
    operator: DashMap<String, SecretString>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_caller_key(&self, caller: &CallerId, provider: &str, key: impl Into<String>) {
        self.caller.insert(
            (caller.as_str().to_string(), provider.to_lowercase()),
            SecretString::from(key.into()),
        );
    }

    pub fn set_operator_key(&self, provider: &str, key: impl Into<String>) {
        self.operator
            .insert(provider.to_lowercase(), SecretString::from(key.into()));
    }

    pub fn with_operator_key(self, provider: &str, key: impl Into<String>) -> Self {
        self.set_operator_key(provider, key);
        self
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn caller_key(&self, caller: &CallerId, provider: &str) -> Result<Option<SecretString>> {
        let key = (caller.as_str().to_string(), provider.to_lowercase());
        Ok(self
            .caller
            .get(&key)
            .map(|entry| entry.value().clone())
            .and_then(non_empty))
    }

    async fn operator_key(&self, provider: &str) -> Result<Option<SecretString>> {
        Ok(self
            .operator
            .get(&provider.to_lowercase())
            .map(|entry| entry.value().clone())
            .and_then(non_empty))
    }
}

// =============================================================================
// In-Memory Chain Store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryChainStore {
    caller: DashMap<String, Vec<ChainEntry>>,
    tiers: DashMap<String, Vec<ChainEntry>>,
    default: Vec<ChainEntry>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator chains from configuration
    pub fn from_config(config: &ChainsConfig) -> Self {
        let tiers = DashMap::new();
        for (tier, chain) in &config.tiers {
            tiers.insert(Tier::new(tier).as_str().to_string(), chain.clone());
        }
        Self {
            caller: DashMap::new(),
            tiers,
            default: config.default.clone(),
        }
    }

    pub fn set_caller_chain(&self, caller: &CallerId, chain: Vec<ChainEntry>) {
        self.caller.insert(caller.as_str().to_string(), chain);
    }

    pub fn set_tier_chain(&self, tier: &Tier, chain: Vec<ChainEntry>) {
        self.tiers.insert(tier.as_str().to_string(), chain);
    }

    pub fn with_default_chain(mut self, chain: Vec<ChainEntry>) -> Self {
        self.default = chain;
        self
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn caller_chain(&self, caller: &CallerId) -> Result<Vec<ChainEntry>> {
        Ok(self
            .caller
            .get(caller.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn tier_chain(&self, tier: &Tier) -> Result<Vec<ChainEntry>> {
        Ok(self
            .tiers
            .get(tier.as_str())
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn default_chain(&self) -> Result<Vec<ChainEntry>> {
        Ok(self.default.clone())
    }
}
