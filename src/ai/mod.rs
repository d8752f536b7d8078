//! LLM Orchestration Layer
//!
//! Everything needed to decide which model runs a request and what it costs.

pub mod pricing;
pub mod provider;
pub mod resolver;
pub mod timeout;
pub mod tokenizer;

pub use pricing::{PricingCache, PricingEntry, PricingError, PricingSnapshot, PricingSource};
pub use provider::{ModelLimits, ProviderCapability, ProviderRegistry};
pub use resolver::{
    CandidateConfig, ChainAttempt, ChainEntry, ChainStore, ConfigChain, ConfigResolver, KeySource,
    KeyStore, MemoryChainStore, MemoryKeyStore, OverrideEntry, ResolutionBranch,
};
pub use timeout::{TimeoutConfig, with_timeout};
pub use tokenizer::estimate_tokens;
