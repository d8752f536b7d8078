//! Discover Command
//!
//! Runs URL discovery over HTTP and prints one `depth url` line per result.
//!
//! Usage:
//!   chainsift discover https://example.com/ [--max-depth 2] [--max-pages 20]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ConfigLoader;
use crate::crawl::{HttpLinkFetcher, UrlDiscoverer};
use crate::types::Result;

#[derive(Default)]
pub struct DiscoverArgs {
    pub seeds: Vec<String>,
    pub max_depth: Option<u32>,
    pub max_pages: Option<usize>,
    pub pattern: Option<String>,
    pub selector: Option<String>,
}

pub async fn run(args: DiscoverArgs) -> Result<()> {
    let mut options = ConfigLoader::load()?.discovery;
    if let Some(depth) = args.max_depth {
        options.max_depth = depth;
    }
    if let Some(pages) = args.max_pages {
        options.max_pages = pages;
    }
    if let Some(selector) = args.selector {
        options.selector = selector;
    }
    options.link_pattern = args.pattern.or(options.link_pattern);

    let fetcher = Arc::new(HttpLinkFetcher::new(&options)?);
    let discoverer = UrlDiscoverer::new(fetcher, options)?;

    // Ctrl-C stops discovery but still prints what was found
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping discovery");
            on_signal.cancel();
        }
    });

    let urls = discoverer.discover(&args.seeds, cancel).await?;
    for url in &urls {
        println!("{} {}", url.depth, url.url);
    }
    info!(count = urls.len(), "Discovery done");
    Ok(())
}
