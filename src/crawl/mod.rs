//! Multi-Page Crawling
//!
//! ## Modules
//!
//! - `normalize`: URL normalization and link resolution
//! - `discovery`: bounded breadth-first [`UrlDiscoverer`]
//! - `budget`: balance snapshot and running spend
//! - `result`: page and crawl results
//! - `orchestrator`: [`CrawlOrchestrator`], the per-page chain walk

mod budget;
mod discovery;
mod normalize;
mod orchestrator;
mod result;

pub use budget::{Billing, BudgetSnapshot, BudgetTracker, CrawlBudgetState};
pub use discovery::{
    DiscoveredUrl, DiscoveryOptions, DiscoveryStats, HttpLinkFetcher, LinkFetcher, UrlDiscoverer,
};
pub use normalize::{normalize_url, normalized_key, resolve_link, same_origin};
pub use orchestrator::{CrawlCallbacks, CrawlOptions, CrawlOrchestrator, NoopCallbacks};
pub use result::{CrawlResult, PageResult, StopReason};
