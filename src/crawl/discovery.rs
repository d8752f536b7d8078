//! URL Discovery
//!
//! Breadth-first link discovery from seed URLs. Seeds are emitted first at
//! depth 0; every page fetched for links dispatches its own children as soon
//! as they are found, so deeper levels overlap with shallower ones.
//!
//! ## Bounds
//!
//! - `max_depth`: pages at it are queued but never fetched for links
//! - `max_urls`: total queued URLs, seeds included (default `2 * max_pages`)
//! - `max_pages`: length of the list returned by [`UrlDiscoverer::discover`]
//!
//! Every URL is emitted at most once per run, keyed by its normalized form.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::normalize::{normalize_url, resolve_link};
use crate::constants::{discovery, network};
use crate::types::{ChainsiftError, Result};

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Maximum link depth from a seed (seeds are depth 0)
    pub max_depth: u32,
    /// Maximum URLs returned
    pub max_pages: usize,
    /// Maximum URLs queued; `None` means `2 * max_pages`
    pub max_urls: Option<usize>,
    /// Concurrent link fetches
    pub concurrency: usize,
    /// Politeness delay before each link fetch in milliseconds
    pub delay_ms: u64,
    /// Only follow links sharing a seed's origin
    pub same_origin: bool,
    /// CSS selector for followable links
    pub selector: String,
    /// Regex a link must match to be queued
    pub link_pattern: Option<String>,
    /// CSS selector for pagination links, followed regardless of `link_pattern`
    pub next_page_selector: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: discovery::MAX_DEPTH,
            max_pages: discovery::MAX_PAGES,
            max_urls: None,
            concurrency: discovery::CONCURRENCY,
            delay_ms: 0,
            same_origin: true,
            selector: discovery::DEFAULT_SELECTOR.to_string(),
            link_pattern: None,
            next_page_selector: None,
            user_agent: network::USER_AGENT.to_string(),
            request_timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DiscoveryOptions {
    pub fn url_limit(&self) -> usize {
        self.max_urls
            .unwrap_or(self.max_pages.saturating_mul(discovery::MAX_URLS_FACTOR))
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_link_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.link_pattern = Some(pattern.into());
        self
    }
}

/// A URL queued for extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredUrl {
    pub url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
}

/// Counters for one discovery run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub discovered: usize,
    pub fetch_errors: usize,
    pub hit_url_limit: bool,
    pub cancelled: bool,
}

impl DiscoveryStats {
    /// Wait for a discovery task; a panicked or aborted task yields zeroed stats
    pub async fn join(handle: JoinHandle<DiscoveryStats>) -> Self {
        match handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Discovery task failed");
                Self::default()
            }
        }
    }
}

// =============================================================================
// Link Fetching
// =============================================================================

/// Source of page HTML for link extraction
#[async_trait]
pub trait LinkFetcher: Send + Sync {
    async fn fetch_html(&self, url: &Url) -> Result<String>;
}

/// Plain HTTP GET via reqwest
pub struct HttpLinkFetcher {
    client: reqwest::Client,
}

impl HttpLinkFetcher {
    pub fn new(options: &DiscoveryOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkFetcher for HttpLinkFetcher {
    async fn fetch_html(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainsiftError::Discovery {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        Ok(response.text().await?)
    }
}

// =============================================================================
// Link Extraction
// =============================================================================

/// Validated selector and pattern strings
///
/// Selectors are re-parsed per page so no parsed DOM state crosses an await.
#[derive(Debug, Clone)]
struct LinkRules {
    selector: String,
    next_page_selector: Option<String>,
    pattern: Option<Regex>,
}

impl LinkRules {
    fn from_options(options: &DiscoveryOptions) -> Result<Self> {
        parse_selector(&options.selector)?;
        if let Some(next) = &options.next_page_selector {
            parse_selector(next)?;
        }

        let pattern = options
            .link_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ChainsiftError::Config(format!("invalid link pattern: {}", e)))?;

        Ok(Self {
            selector: options.selector.clone(),
            next_page_selector: options.next_page_selector.clone(),
            pattern,
        })
    }

    /// Followable links in document order, pattern applied
    fn extract(&self, html: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let mut links = Vec::new();

        if let Ok(selector) = parse_selector(&self.selector) {
            for element in document.select(&selector) {
                if element.value().attr("download").is_some() {
                    continue;
                }
                let Some(link) = element
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_link(href, base))
                else {
                    continue;
                };
                if self.pattern.as_ref().is_none_or(|p| p.is_match(link.as_str())) {
                    links.push(link);
                }
            }
        }

        if let Some(next) = &self.next_page_selector
            && let Ok(selector) = parse_selector(next)
        {
            links.extend(
                document
                    .select(&selector)
                    .filter_map(|e| e.value().attr("href"))
                    .filter_map(|href| resolve_link(href, base)),
            );
        }

        links
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| ChainsiftError::Config(format!("invalid selector '{}': {:?}", selector, e)))
}

// =============================================================================
// Discoverer
// =============================================================================

/// Frontier shared by in-flight fetch tasks
#[derive(Debug, Default)]
struct Frontier {
    seen: HashSet<String>,
    stats: DiscoveryStats,
}

pub struct UrlDiscoverer {
    fetcher: Arc<dyn LinkFetcher>,
    options: DiscoveryOptions,
    rules: Arc<LinkRules>,
}

impl UrlDiscoverer {
    pub fn new(fetcher: Arc<dyn LinkFetcher>, options: DiscoveryOptions) -> Result<Self> {
        let rules = Arc::new(LinkRules::from_options(&options)?);
        Ok(Self {
            fetcher,
            options,
            rules,
        })
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Start discovery in the background
    ///
    /// Seeds are sent before this returns; the handle resolves once the
    /// frontier is exhausted, the URL limit is hit, the token is cancelled, or
    /// the receiver is dropped.
    pub fn spawn(
        &self,
        seeds: &[String],
        cancel: CancellationToken,
    ) -> Result<(
        mpsc::UnboundedReceiver<DiscoveredUrl>,
        JoinHandle<DiscoveryStats>,
    )> {
        let (tx, rx) = mpsc::unbounded_channel();
        let limit = self.options.url_limit();
        let mut frontier = Frontier::default();
        let mut origins = HashSet::new();
        let mut initial = Vec::new();

        for seed in seeds {
            let url = normalize_url(seed)?;
            origins.insert(url.origin());
            if frontier.stats.discovered >= limit {
                frontier.stats.hit_url_limit = true;
                break;
            }
            if !frontier.seen.insert(url.to_string()) {
                continue;
            }
            frontier.stats.discovered += 1;
            let _ = tx.send(DiscoveredUrl {
                url: url.to_string(),
                depth: 0,
                parent_url: None,
            });
            if self.options.max_depth > 0 {
                initial.push(url);
            }
        }

        info!(
            seeds = frontier.stats.discovered,
            max_depth = self.options.max_depth,
            url_limit = limit,
            "Starting discovery"
        );

        let run = DiscoveryRun {
            fetcher: self.fetcher.clone(),
            rules: self.rules.clone(),
            options: self.options.clone(),
            origins: Arc::new(origins),
            frontier: Arc::new(Mutex::new(frontier)),
            tx,
            limit,
        };
        let handle = tokio::spawn(run.drive(initial, cancel));

        Ok((rx, handle))
    }

    /// Collect discovered URLs, breadth-first, capped at `max_pages`
    pub async fn discover(
        &self,
        seeds: &[String],
        cancel: CancellationToken,
    ) -> Result<Vec<DiscoveredUrl>> {
        let (mut rx, handle) = self.spawn(seeds, cancel)?;

        let mut urls = Vec::new();
        while let Some(url) = rx.recv().await {
            urls.push(url);
        }

        let stats = DiscoveryStats::join(handle).await;
        debug!(?stats, "Discovery finished");

        urls.sort_by_key(|u| u.depth);
        urls.truncate(self.options.max_pages);
        Ok(urls)
    }
}

/// State owned by the background discovery task
struct DiscoveryRun {
    fetcher: Arc<dyn LinkFetcher>,
    rules: Arc<LinkRules>,
    options: DiscoveryOptions,
    origins: Arc<HashSet<Origin>>,
    frontier: Arc<Mutex<Frontier>>,
    tx: mpsc::UnboundedSender<DiscoveredUrl>,
    limit: usize,
}

impl DiscoveryRun {
    async fn drive(self, initial: Vec<Url>, cancel: CancellationToken) -> DiscoveryStats {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let delay = Duration::from_millis(self.options.delay_ms);
        let mut tasks: JoinSet<(Url, u32, Result<Vec<Url>>)> = JoinSet::new();

        let spawn_fetch = |tasks: &mut JoinSet<_>, url: Url, depth: u32| {
            let fetcher = self.fetcher.clone();
            let rules = self.rules.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (url, depth, Ok(Vec::new()));
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let links = match fetcher.fetch_html(&url).await {
                    Ok(html) => Ok(rules.extract(&html, &url)),
                    Err(e) => Err(e),
                };
                (url, depth, links)
            });
        };

        for url in initial {
            spawn_fetch(&mut tasks, url, 0);
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    self.lock_frontier().stats.cancelled = true;
                    break;
                }
                joined = tasks.join_next() => joined,
            };

            let Some(joined) = joined else { break };
            let Ok((parent, depth, links)) = joined else {
                continue;
            };

            let links = match links {
                Ok(links) => links,
                Err(e) => {
                    warn!(url = %parent, error = %e, "Link fetch failed");
                    self.lock_frontier().stats.fetch_errors += 1;
                    continue;
                }
            };

            let child_depth = depth + 1;
            let mut stop = false;
            for link in links {
                match self.admit(&link, child_depth) {
                    Admission::Queued => {
                        let sent = self.tx.send(DiscoveredUrl {
                            url: link.to_string(),
                            depth: child_depth,
                            parent_url: Some(parent.to_string()),
                        });
                        if sent.is_err() {
                            stop = true;
                            break;
                        }
                        if child_depth < self.options.max_depth {
                            spawn_fetch(&mut tasks, link, child_depth);
                        }
                    }
                    Admission::Skipped => {}
                    Admission::LimitReached => {
                        stop = true;
                        break;
                    }
                }
            }

            if stop {
                tasks.abort_all();
                break;
            }
        }

        let stats = self.lock_frontier().stats.clone();
        info!(
            discovered = stats.discovered,
            fetch_errors = stats.fetch_errors,
            "Discovery complete"
        );
        stats
    }

    fn admit(&self, link: &Url, depth: u32) -> Admission {
        if self.options.same_origin && !self.origins.contains(&link.origin()) {
            return Admission::Skipped;
        }

        if depth > self.options.max_depth {
            return Admission::Skipped;
        }

        let mut frontier = self.lock_frontier();
        if frontier.seen.contains(link.as_str()) {
            return Admission::Skipped;
        }
        if frontier.stats.discovered >= self.limit {
            frontier.stats.hit_url_limit = true;
            return Admission::LimitReached;
        }

        frontier.seen.insert(link.to_string());
        frontier.stats.discovered += 1;
        Admission::Queued
    }

    fn lock_frontier(&self) -> std::sync::MutexGuard<'_, Frontier> {
        self.frontier.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Admission {
    Queued,
    Skipped,
    LimitReached,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves canned HTML keyed by URL
    struct MockSite {
        pages: HashMap<String, String>,
        calls: AtomicU32,
    }

    impl MockSite {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, h)| (u.to_string(), h.to_string()))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LinkFetcher for MockSite {
        async fn fetch_html(&self, url: &Url) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| ChainsiftError::Discovery {
                    url: url.to_string(),
                    message: "HTTP 404".to_string(),
                })
        }
    }

    fn seed() -> Vec<String> {
        vec!["https://site.test/".to_string()]
    }

    #[tokio::test]
    async fn test_depth_one_dedupes_trailing_slash() {
        let site = Arc::new(MockSite::new(&[(
            "https://site.test/",
            r#"<a href="/a">A</a><a href="/b">B</a><a href="/x">X</a>
               <a href="/x/">X again</a><a href="/c#top">C</a><a href="/d">D</a>"#,
        )]));
        let options = DiscoveryOptions::default().with_max_depth(1);
        let discoverer = UrlDiscoverer::new(site.clone(), options).unwrap();

        let urls = discoverer
            .discover(&seed(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(urls.len(), 6);
        assert_eq!(urls[0].url, "https://site.test/");
        assert_eq!(urls[0].depth, 0);
        assert!(urls[1..].iter().all(|u| u.depth == 1));
        assert!(
            urls[1..]
                .iter()
                .all(|u| u.parent_url.as_deref() == Some("https://site.test/"))
        );
        let xs = urls.iter().filter(|u| u.url == "https://site.test/x").count();
        assert_eq!(xs, 1);
        // depth-1 pages are not fetched at max_depth 1
        assert_eq!(site.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pages_at_max_depth_are_not_expanded() {
        let site = Arc::new(MockSite::new(&[
            ("https://site.test/", r#"<a href="/a">A</a>"#),
            ("https://site.test/a", r#"<a href="/deep">Deep</a>"#),
        ]));
        let options = DiscoveryOptions::default().with_max_depth(1);
        let discoverer = UrlDiscoverer::new(site, options).unwrap();

        let urls = discoverer
            .discover(&seed(), CancellationToken::new())
            .await
            .unwrap();

        assert!(urls.iter().all(|u| u.url != "https://site.test/deep"));
    }

    #[tokio::test]
    async fn test_breadth_first_order_and_page_cap() {
        let site = Arc::new(MockSite::new(&[
            ("https://site.test/", r#"<a href="/a">A</a><a href="/b">B</a>"#),
            ("https://site.test/a", r#"<a href="/a1">A1</a><a href="/a2">A2</a>"#),
            ("https://site.test/b", r#"<a href="/b1">B1</a>"#),
        ]));
        let options = DiscoveryOptions::default()
            .with_max_depth(2)
            .with_max_pages(4);
        let discoverer = UrlDiscoverer::new(site, options).unwrap();

        let urls = discoverer
            .discover(&seed(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(urls.len(), 4);
        let depths: Vec<u32> = urls.iter().map(|u| u.depth).collect();
        assert_eq!(&depths[..3], &[0, 1, 1]);
        assert_eq!(depths[3], 2);
    }

    #[tokio::test]
    async fn test_same_origin_and_pattern_filters() {
        let site = Arc::new(MockSite::new(&[(
            "https://site.test/",
            r#"<a href="https://other.test/post/1">Off-site</a>
               <a href="/post/2">Post</a><a href="/about">About</a>
               <a href="mailto:hi@site.test">Mail</a>"#,
        )]));
        let options = DiscoveryOptions::default()
            .with_max_depth(1)
            .with_link_pattern("/post/");
        let discoverer = UrlDiscoverer::new(site, options).unwrap();

        let urls = discoverer
            .discover(&seed(), CancellationToken::new())
            .await
            .unwrap();

        let found: Vec<&str> = urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(found, vec!["https://site.test/", "https://site.test/post/2"]);
    }

    #[tokio::test]
    async fn test_next_page_selector_bypasses_pattern() {
        let site = Arc::new(MockSite::new(&[(
            "https://site.test/",
            r#"<a href="/item/1">One</a><a class="next" href="/?page=2">Next</a>"#,
        )]));
        let mut options = DiscoveryOptions::default()
            .with_max_depth(1)
            .with_link_pattern("/item/");
        options.next_page_selector = Some("a.next".to_string());
        let discoverer = UrlDiscoverer::new(site, options).unwrap();

        let urls = discoverer
            .discover(&seed(), CancellationToken::new())
            .await
            .unwrap();

        assert!(urls.iter().any(|u| u.url == "https://site.test/?page=2"));
        assert!(urls.iter().any(|u| u.url == "https://site.test/item/1"));
    }

    #[tokio::test]
    async fn test_url_limit_bounds_queue() {
        let links: String = (0..20).map(|i| format!(r#"<a href="/p{i}">P</a>"#)).collect();
        let site = Arc::new(MockSite::new(&[("https://site.test/", links.as_str())]));
        let mut options = DiscoveryOptions::default().with_max_depth(1);
        options.max_urls = Some(5);
        options.max_pages = 100;
        let discoverer = UrlDiscoverer::new(site, options).unwrap();

        let (mut rx, handle) = discoverer.spawn(&seed(), CancellationToken::new()).unwrap();
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        let stats = handle.await.unwrap();

        assert_eq!(count, 5);
        assert!(stats.hit_url_limit);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_emits_only_seeds() {
        let site = Arc::new(MockSite::new(&[(
            "https://site.test/",
            r#"<a href="/a">A</a>"#,
        )]));
        let discoverer = UrlDiscoverer::new(site, DiscoveryOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let urls = discoverer.discover(&seed(), cancel).await.unwrap();

        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].depth, 0);
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let site: Arc<dyn LinkFetcher> = Arc::new(MockSite::new(&[]));
        let bad_pattern = DiscoveryOptions::default().with_link_pattern("(");
        assert!(UrlDiscoverer::new(site.clone(), bad_pattern).is_err());

        let mut bad_selector = DiscoveryOptions::default();
        bad_selector.selector = "a[".to_string();
        assert!(UrlDiscoverer::new(site, bad_selector).is_err());
    }

    #[test]
    fn test_url_limit_default() {
        let options = DiscoveryOptions::default().with_max_pages(7);
        assert_eq!(options.url_limit(), 14);
    }

    #[tokio::test]
    async fn test_http_fetcher_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a href="/docs/">Docs</a><a href="/blog">Blog</a>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blog"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let options = DiscoveryOptions::default().with_max_depth(2);
        let fetcher = Arc::new(HttpLinkFetcher::new(&options).unwrap());
        let discoverer = UrlDiscoverer::new(fetcher, options).unwrap();

        let urls = discoverer
            .discover(&[server.uri()], CancellationToken::new())
            .await
            .unwrap();

        let found: Vec<String> = urls.iter().map(|u| u.url.clone()).collect();
        assert!(found.contains(&format!("{}/docs", server.uri())));
        assert!(found.contains(&format!("{}/blog", server.uri())));
    }

    #[tokio::test]
    async fn test_panicked_discovery_task_yields_empty_stats() {
        let handle: JoinHandle<DiscoveryStats> =
            tokio::spawn(async { panic!("link parser blew up") });
        assert_eq!(DiscoveryStats::join(handle).await, DiscoveryStats::default());

        let done = tokio::spawn(async {
            DiscoveryStats {
                discovered: 3,
                ..Default::default()
            }
        });
        assert_eq!(DiscoveryStats::join(done).await.discovered, 3);
    }
}
