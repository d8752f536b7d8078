//! Crawl Results

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::ai::resolver::CandidateConfig;
use crate::extract::{PageExtraction, PageFailure};
use crate::types::ErrorCategory;

/// Why a crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ran out of URLs
    Completed,
    InsufficientBalance,
    CallbackError,
    ContextCancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::InsufficientBalance => "insufficient_balance",
            Self::CallbackError => "callback_error",
            Self::ContextCancelled => "context_cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attempted URL
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub url: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Model that produced the result or the last failure
    pub provider: Option<String>,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub fetch_ms: u64,
    pub extract_ms: u64,
    pub retry_count: u8,
    pub used_dynamic_fetch: bool,
    /// Succeeded on a model other than the first
    pub fallback_used: bool,
    pub models_tried: Vec<String>,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Debug capture only
    #[serde(skip)]
    pub raw_content: Option<String>,
}

impl PageResult {
    pub(crate) fn succeeded(
        url: String,
        depth: u32,
        config: &CandidateConfig,
        extraction: PageExtraction,
        models_tried: Vec<String>,
        cost_usd: f64,
    ) -> Self {
        let fallback_used = models_tried.len() > 1;
        Self {
            url,
            depth,
            data: Some(extraction.data),
            error: None,
            error_category: None,
            provider: Some(config.provider.clone()),
            model: Some(config.model.clone()),
            input_tokens: extraction.usage.input_tokens,
            output_tokens: extraction.usage.output_tokens,
            fetch_ms: extraction.fetch_duration.as_millis() as u64,
            extract_ms: extraction.extract_duration.as_millis() as u64,
            retry_count: extraction.retry_count,
            used_dynamic_fetch: extraction.used_dynamic_fetch,
            fallback_used,
            models_tried,
            cost_usd,
            generation_id: extraction.generation_id,
            raw_content: Some(extraction.raw_content),
        }
    }

    pub(crate) fn failed(
        url: String,
        depth: u32,
        config: &CandidateConfig,
        failure: PageFailure,
        models_tried: Vec<String>,
    ) -> Self {
        Self {
            url,
            depth,
            data: None,
            error: Some(failure.error.message),
            error_category: Some(failure.error.category),
            provider: Some(config.provider.clone()),
            model: Some(config.model.clone()),
            input_tokens: 0,
            output_tokens: 0,
            fetch_ms: failure.fetch_duration.as_millis() as u64,
            extract_ms: failure.extract_duration.as_millis() as u64,
            retry_count: failure.retry_count,
            used_dynamic_fetch: failure.used_dynamic_fetch,
            fallback_used: false,
            models_tried,
            cost_usd: 0.0,
            generation_id: None,
            raw_content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_category.is_none()
    }
}

/// Everything a crawl produced
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub crawl_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: Vec<PageResult>,
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    /// Queued but never dispatched because the crawl had stopped
    pub pages_skipped: usize,
    pub urls_discovered: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub is_byok: bool,
    pub stopped_early: bool,
    pub stop_reason: StopReason,
}

impl CrawlResult {
    pub(crate) fn begin(is_byok: bool) -> Self {
        let now = Utc::now();
        Self {
            crawl_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            pages: Vec::new(),
            pages_succeeded: 0,
            pages_failed: 0,
            pages_skipped: 0,
            urls_discovered: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            is_byok,
            stopped_early: false,
            stop_reason: StopReason::Completed,
        }
    }

    pub(crate) fn push(&mut self, page: PageResult) {
        if page.is_success() {
            self.pages_succeeded += 1;
            self.total_input_tokens += page.input_tokens;
            self.total_output_tokens += page.output_tokens;
            self.total_cost_usd += page.cost_usd;
        } else {
            self.pages_failed += 1;
        }
        self.pages.push(page);
    }

    /// Last failed page, if any
    pub fn last_error(&self) -> Option<&PageResult> {
        self.pages.iter().rev().find(|p| !p.is_success())
    }
}
