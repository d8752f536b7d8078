//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Pricing cache constants
pub mod pricing {
    /// Pricing table time-to-live (seconds)
    pub const REFRESH_INTERVAL_SECS: u64 = 3600;

    /// Retries after the first failed refresh attempt
    pub const REFRESH_RETRIES: usize = 3;

    /// First retry delay (milliseconds)
    pub const REFRESH_MIN_DELAY_MS: u64 = 200;

    /// Growth factor between retry delays (200 -> 600 -> 1200)
    pub const REFRESH_BACKOFF_FACTOR: f32 = 3.0;

    /// Cap on a single retry delay (milliseconds)
    pub const REFRESH_MAX_DELAY_MS: u64 = 1200;

    /// Minimum gap after a failed refresh before on-access refresh runs again (seconds)
    pub const REFRESH_COOLDOWN_SECS: u64 = 30;

    /// Retries for a generation-cost lookup that is not visible yet
    pub const GENERATION_LOOKUP_RETRIES: usize = 3;

    /// Delay between generation-cost lookups (milliseconds)
    pub const GENERATION_LOOKUP_DELAY_MS: u64 = 1000;

    /// Default pricing endpoint (OpenRouter-compatible catalogue)
    pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1";

    /// Provider key the catalogue is stored under
    pub const CATALOGUE_PROVIDER: &str = "openrouter";
}

/// Config resolution constants
pub mod resolver {
    /// Hard ceiling on resolved max output tokens
    pub const MAX_OUTPUT_TOKENS_CEILING: u32 = 16_384;

    /// Output tokens used when neither the chain nor the registry knows better
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

    /// Fraction of the context window an input may occupy
    pub const CONTEXT_CAPACITY_RATIO: f64 = 0.8;

    /// Lowest tier, used as the last chain fallback
    pub const FREE_TIER: &str = "free";
}

/// Page extraction constants
pub mod extraction {
    /// Minimum trimmed characters for content to be worth extracting
    pub const MIN_CONTENT_CHARS: usize = 200;

    /// Browser render timeout (milliseconds)
    pub const DYNAMIC_RENDER_TIMEOUT_MS: u64 = 30_000;

    /// Structured extraction timeout (seconds)
    pub const EXTRACTION_TIMEOUT_SECS: u64 = 300;

    /// Characters per estimated token
    pub const CHARS_PER_TOKEN: usize = 4;
}

/// URL discovery constants
pub mod discovery {
    /// Default maximum link depth from a seed
    pub const MAX_DEPTH: u32 = 3;

    /// Default maximum pages returned
    pub const MAX_PAGES: usize = 10;

    /// Queued URL bound as a multiple of max pages
    pub const MAX_URLS_FACTOR: usize = 2;

    /// Concurrent link fetches
    pub const CONCURRENCY: usize = 4;

    /// Default link selector
    pub const DEFAULT_SELECTOR: &str = "a[href]";
}

/// Crawl orchestration constants
pub mod crawl {
    /// Pages processed concurrently
    pub const PAGE_CONCURRENCY: usize = 4;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Default user agent for discovery fetches
    pub const USER_AGENT: &str = concat!("chainsift/", env!("CARGO_PKG_VERSION"));
}
