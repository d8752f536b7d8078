//! Crawl Orchestrator
//!
//! Pulls discovered URLs as a lazy stream, runs each through the model chain
//! with bounded concurrency, prices successes and stops early when the
//! balance, a callback or the caller says so.
//!
//! ## Stopping
//!
//! Every stop cancels the crawl's token. Discovery unwinds, pages not yet
//! dispatched are counted as skipped, and pages already in flight are still
//! drained into the result so their cost is not lost.

use std::pin::pin;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::budget::{BudgetSnapshot, BudgetTracker};
use super::discovery::{
    DiscoveredUrl, DiscoveryOptions, DiscoveryStats, LinkFetcher, UrlDiscoverer,
};
use super::result::{CrawlResult, PageResult, StopReason};
use crate::ai::pricing::PricingCache;
use crate::ai::resolver::{CandidateConfig, ConfigChain};
use crate::config::Config;
use crate::constants::crawl::PAGE_CONCURRENCY;
use crate::extract::{ExtractRequest, PageExtractor, PageFailure};
use crate::types::{ChainsiftError, ErrorCategory, Result};

// =============================================================================
// Options & Callbacks
// =============================================================================

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub discovery: DiscoveryOptions,
    pub request: ExtractRequest,
    /// Pages extracted concurrently
    pub page_concurrency: usize,
}

impl CrawlOptions {
    pub fn new(request: ExtractRequest) -> Self {
        Self {
            discovery: DiscoveryOptions::default(),
            request,
            page_concurrency: PAGE_CONCURRENCY,
        }
    }

    /// Discovery defaults and page concurrency from loaded config
    pub fn from_config(config: &Config, request: ExtractRequest) -> Self {
        Self {
            discovery: config.discovery.clone(),
            request,
            page_concurrency: config.crawl.page_concurrency,
        }
    }

    pub fn with_discovery(mut self, discovery: DiscoveryOptions) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_page_concurrency(mut self, concurrency: usize) -> Self {
        self.page_concurrency = concurrency;
        self
    }
}

/// Caller hooks, invoked from the crawl task
pub trait CrawlCallbacks: Send + Sync {
    /// An `Err` stops the crawl with [`StopReason::CallbackError`]
    fn on_result(&self, _result: &PageResult) -> anyhow::Result<()> {
        Ok(())
    }

    /// Running count of URLs handed to extraction
    fn on_urls_queued(&self, _count: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl CrawlCallbacks for NoopCallbacks {}

// =============================================================================
// Orchestrator
// =============================================================================

enum PageOutcome {
    /// Not dispatched because the crawl had already stopped
    Skipped(String),
    Finished(Box<PageResult>),
}

pub struct CrawlOrchestrator {
    pages: Arc<PageExtractor>,
    pricing: Arc<PricingCache>,
    links: Arc<dyn LinkFetcher>,
}

impl CrawlOrchestrator {
    pub fn new(
        pages: Arc<PageExtractor>,
        pricing: Arc<PricingCache>,
        links: Arc<dyn LinkFetcher>,
    ) -> Self {
        Self {
            pages,
            pricing,
            links,
        }
    }

    /// Crawl from `seeds`, extracting every discovered page
    ///
    /// Fails only for an unusable setup or when no page succeeded and at
    /// least one failed; per-page failures otherwise live in the result.
    #[instrument(
        skip_all,
        fields(seeds = seeds.len(), models = chain.len(), byok = chain.is_byok())
    )]
    pub async fn run(
        &self,
        seeds: &[String],
        chain: &ConfigChain,
        options: &CrawlOptions,
        budget: BudgetSnapshot,
        callbacks: &dyn CrawlCallbacks,
        cancel: CancellationToken,
    ) -> Result<CrawlResult> {
        if chain.is_empty() {
            return Err(ChainsiftError::Config(
                "crawl requires at least one model config".to_string(),
            ));
        }

        let discoverer = UrlDiscoverer::new(self.links.clone(), options.discovery.clone())?;
        let crawl_cancel = cancel.child_token();
        let (rx, discovery) = discoverer.spawn(seeds, crawl_cancel.clone())?;

        let tracker = BudgetTracker::new(budget, !chain.is_byok());
        let mut result = CrawlResult::begin(chain.is_byok());

        let urls = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|url| (url, rx))
        });
        let mut outcomes = pin!(
            urls.take(options.discovery.max_pages)
                .enumerate()
                .map(|(index, discovered)| {
                    callbacks.on_urls_queued(index + 1);
                    self.process_page(discovered, chain, &options.request, &tracker, &crawl_cancel)
                })
                .buffered(options.page_concurrency.max(1))
        );

        let mut callbacks_failed = false;
        while let Some(outcome) = outcomes.next().await {
            let page = match outcome {
                PageOutcome::Skipped(url) => {
                    debug!(url = %url, "Skipping page, crawl stopped");
                    result.pages_skipped += 1;
                    continue;
                }
                PageOutcome::Finished(page) => *page,
            };

            if !callbacks_failed && let Err(e) = callbacks.on_result(&page) {
                warn!(url = %page.url, error = %e, "Result callback failed, stopping crawl");
                callbacks_failed = true;
                if tracker.stop(StopReason::CallbackError) {
                    crawl_cancel.cancel();
                }
            }

            if page.is_success() && tracker.record(page.cost_usd) {
                info!(
                    url = %page.url,
                    cost_usd = page.cost_usd,
                    "Stopping crawl, balance cannot cover another page"
                );
                crawl_cancel.cancel();
            }

            result.push(page);
        }

        // Nothing left to extract; stop any discovery still fetching
        crawl_cancel.cancel();
        let stats = DiscoveryStats::join(discovery).await;
        result.urls_discovered = stats.discovered;

        if cancel.is_cancelled() {
            tracker.stop(StopReason::ContextCancelled);
        }

        let state = tracker.state();
        result.stopped_early = state.stopped_early;
        result.stop_reason = state.stop_reason.unwrap_or(StopReason::Completed);
        result.finished_at = Utc::now();

        info!(
            crawl_id = %result.crawl_id,
            succeeded = result.pages_succeeded,
            failed = result.pages_failed,
            skipped = result.pages_skipped,
            cost_usd = result.total_cost_usd,
            stop_reason = %result.stop_reason,
            "Crawl finished"
        );

        if result.pages_succeeded == 0
            && let Some(last) = result.last_error()
        {
            return Err(ChainsiftError::Page {
                url: last.url.clone(),
                category: last.error_category.unwrap_or(ErrorCategory::ExtractionError),
                message: last.error.clone().unwrap_or_default(),
            });
        }

        Ok(result)
    }

    /// Walk the chain for one page until a model succeeds or fallback ends
    async fn process_page(
        &self,
        discovered: DiscoveredUrl,
        chain: &ConfigChain,
        request: &ExtractRequest,
        tracker: &BudgetTracker,
        cancel: &CancellationToken,
    ) -> PageOutcome {
        if cancel.is_cancelled() || tracker.is_stopped() {
            return PageOutcome::Skipped(discovered.url);
        }

        let mut models_tried = Vec::new();
        let mut last_failure: Option<(PageFailure, &CandidateConfig)> = None;

        for attempt in chain.cursor() {
            let config = attempt.config;
            models_tried.push(config.label());
            debug!(
                url = %discovered.url,
                attempt = attempt.number,
                total = attempt.total,
                provider = %config.provider,
                model = %config.model,
                "Extracting page"
            );

            match self.pages.extract(&discovered.url, request, config).await {
                Ok(extraction) => {
                    let cost = self
                        .pricing
                        .estimate_cost(
                            &config.provider,
                            &config.model,
                            extraction.usage.input_tokens,
                            extraction.usage.output_tokens,
                        )
                        .await;
                    return PageOutcome::Finished(Box::new(PageResult::succeeded(
                        discovered.url,
                        discovered.depth,
                        config,
                        extraction,
                        models_tried,
                        cost,
                    )));
                }
                Err(failure) => {
                    let fallback =
                        failure.should_fallback() && attempt.has_next() && !cancel.is_cancelled();
                    if fallback {
                        info!(
                            url = %discovered.url,
                            provider = %config.provider,
                            model = %config.model,
                            category = %failure.category(),
                            "Falling back to next model"
                        );
                    }
                    last_failure = Some((failure, config));
                    if !fallback {
                        break;
                    }
                }
            }
        }

        match last_failure {
            Some((failure, config)) => {
                warn!(
                    url = %discovered.url,
                    category = %failure.category(),
                    error = %failure.error.message,
                    "Page failed"
                );
                PageOutcome::Finished(Box::new(PageResult::failed(
                    discovered.url,
                    discovered.depth,
                    config,
                    failure,
                    models_tried,
                )))
            }
            None => PageOutcome::Skipped(discovered.url),
        }
    }
}
