//! Chainsift - Cost-Aware LLM Extraction Orchestration
//!
//! Sits between a caller that wants structured data from web pages and a pool
//! of interchangeable, priced and unreliable LLM providers.
//!
//! ## Core Features
//!
//! - **Chain Resolution**: BYOK × custom-model matrix producing ordered model configs
//! - **Pricing Cache**: TTL refresh-on-access with stale serving and cost fallbacks
//! - **Page Extraction**: Explicit attempt state machine with a single browser escalation
//! - **Crawl Orchestration**: Per-page model fallback with an optimistic balance stop
//! - **URL Discovery**: Bounded breadth-first link discovery with normalized dedup
//!
//! ## Quick Start
//!
//! ```ignore
//! use chainsift::{ConfigLoader, ConfigResolver, CrawlOrchestrator, CrawlOptions};
//!
//! let config = ConfigLoader::load()?;
//! let chain = resolver.resolve(&caller, &tier, byok, custom, None).await?;
//! let budget = BudgetSnapshot::capture(billing.as_ref(), &caller).await?;
//! let result = orchestrator
//!     .run(&seeds, &chain, &CrawlOptions::new(request), budget, &callbacks, cancel)
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: provider registry, pricing cache, chain resolution, token estimates
//! - [`extract`]: per-page extraction and its state machine
//! - [`crawl`]: URL discovery and crawl orchestration
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod crawl;
pub mod extract;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{ChainsiftError, ClassifiedError, ErrorCategory, Result};
pub use types::{CallerId, Tier};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    CandidateConfig, ConfigChain, ConfigResolver, KeySource, PricingCache, ProviderRegistry,
    TimeoutConfig, with_timeout,
};

// =============================================================================
// Extraction & Crawl Re-exports
// =============================================================================

pub use crawl::{
    BudgetSnapshot, CrawlCallbacks, CrawlOptions, CrawlOrchestrator, CrawlResult, PageResult,
    StopReason, UrlDiscoverer,
};
pub use extract::{ExtractRequest, FetchMode, PageExtractor};
