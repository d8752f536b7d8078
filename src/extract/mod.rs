//! Per-Page Extraction
//!
//! Runs one URL through fetch and structured extraction for a single model
//! config, escalating from a static fetch to a browser render at most once.
//!
//! HTML fetching, browser rendering and the LLM call itself are external
//! capabilities behind the traits in this module.
//!
//! ## Modules
//!
//! - `state`: attempt state machine (pure transition function)
//! - `detector`: heuristic bot-protection detection
//! - `page`: [`PageExtractor`], which drives the state machine

mod detector;
mod page;
pub mod state;

pub use detector::HeuristicProtectionDetector;
pub use page::{PageExtraction, PageExtractor, PageFailure};
pub use state::{AttemptEvent, AttemptMachine, AttemptState};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::resolver::CandidateConfig;
use crate::ai::timeout::TimeoutConfig;
use crate::constants::{extraction, network};
use crate::types::{ClassifiedError, ErrorCategory, ErrorClassifier};

// =============================================================================
// Settings
// =============================================================================

/// How a page is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Static fetch that may escalate to a browser render once
    #[default]
    Auto,
    /// Static fetch only
    Static,
    /// Browser render from the start
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Trimmed characters below which content counts as insufficient
    pub min_content_chars: usize,
    /// Browser render timeout in milliseconds
    pub dynamic_render_timeout_ms: u64,
    /// Static fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// Structured extraction timeout in seconds
    pub extraction_timeout_secs: u64,
    /// Mode used when a request does not pick one
    pub default_fetch_mode: FetchMode,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_content_chars: extraction::MIN_CONTENT_CHARS,
            dynamic_render_timeout_ms: extraction::DYNAMIC_RENDER_TIMEOUT_MS,
            fetch_timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            extraction_timeout_secs: extraction::EXTRACTION_TIMEOUT_SECS,
            default_fetch_mode: FetchMode::Auto,
        }
    }
}

impl ExtractionSettings {
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            fetch: Duration::from_secs(self.fetch_timeout_secs),
            render: Duration::from_millis(self.dynamic_render_timeout_ms),
            extraction: Duration::from_secs(self.extraction_timeout_secs),
        }
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// What to extract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSchema {
    /// JSON schema the output must satisfy
    Json(serde_json::Value),
    /// Free-text instruction
    Prompt(String),
}

/// Per-request extraction options
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub schema: ExtractionSchema,
    /// `None` uses the configured default
    pub fetch_mode: Option<FetchMode>,
    /// Whether this caller may use browser rendering
    pub allow_dynamic: bool,
}

impl ExtractRequest {
    pub fn new(schema: ExtractionSchema) -> Self {
        Self {
            schema,
            fetch_mode: None,
            allow_dynamic: true,
        }
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.fetch_mode = Some(mode);
        self
    }

    pub fn with_dynamic(mut self, allow: bool) -> Self {
        self.allow_dynamic = allow;
        self
    }
}

/// Raw fetch result
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content: String,
    pub links: Vec<String>,
    /// Protection signals the fetcher noticed on its own
    pub signals: Vec<String>,
}

impl FetchedPage {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            status: 200,
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Structured extraction result
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub data: serde_json::Value,
    pub usage: TokenUsage,
    /// Provider finish reason; "length" means the output was cut off
    pub finish_reason: Option<String>,
    pub generation_id: Option<String>,
}

impl StructuredOutput {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("length"))
    }
}

/// Bot-protection verdict
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Detection {
    pub detected: bool,
    pub signal: Option<String>,
    /// Whether a browser render may get past it
    pub retryable: bool,
}

impl Detection {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn found(signal: impl Into<String>, retryable: bool) -> Self {
        Self {
            detected: true,
            signal: Some(signal.into()),
            retryable,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by external extraction capabilities
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("fetch failed: {message}")]
    Fetch { status: Option<u16>, message: String },

    #[error("insufficient content: {0}")]
    InsufficientContent(String),

    #[error("LLM call failed: {message}")]
    Llm { status: Option<u16>, message: String },

    #[error("{0}")]
    Other(String),
}

impl ExtractorError {
    pub fn classify(&self, provider: &str) -> ClassifiedError {
        match self {
            Self::Fetch {
                status: Some(status),
                message,
            } => ErrorClassifier::classify_fetch_status(*status, message),
            Self::Fetch {
                status: None,
                message,
            } => ClassifiedError::new(ErrorCategory::FetchError, message.clone()),
            Self::InsufficientContent(message) => {
                ClassifiedError::new(ErrorCategory::InsufficientContent, message.clone())
            }
            Self::Llm {
                status: Some(status),
                message,
            } => ErrorClassifier::classify_llm_status(*status, message, provider),
            Self::Llm {
                status: None,
                message,
            } => ErrorClassifier::classify(message, provider),
            Self::Other(message) => ErrorClassifier::classify(message, provider),
        }
    }
}

// =============================================================================
// External Capabilities
// =============================================================================

/// Page fetch and structured extraction
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage, ExtractorError>;

    async fn extract_structured(
        &self,
        content: &str,
        schema: &ExtractionSchema,
        config: &CandidateConfig,
    ) -> Result<StructuredOutput, ExtractorError>;
}

/// Browser rendering
#[async_trait]
pub trait DynamicFetcher: Send + Sync {
    async fn render(&self, url: &str, timeout_ms: u64) -> Result<String, ExtractorError>;
}

pub trait ProtectionDetector: Send + Sync {
    fn detect(&self, status: u16, headers: &HashMap<String, String>, body: &str) -> Detection;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_status_classification() {
        let blocked = ExtractorError::Fetch {
            status: Some(403),
            message: "forbidden".into(),
        };
        assert_eq!(blocked.classify("x").category, ErrorCategory::BotProtection);

        let missing = ExtractorError::Fetch {
            status: Some(404),
            message: "not found".into(),
        };
        assert_eq!(missing.classify("x").category, ErrorCategory::FetchError);
    }

    #[test]
    fn test_llm_error_classification() {
        let truncated = ExtractorError::Llm {
            status: None,
            message: "response truncated at max_tokens".into(),
        };
        assert_eq!(
            truncated.classify("openai").category,
            ErrorCategory::LlmTruncation
        );

        let auth = ExtractorError::Llm {
            status: Some(401),
            message: "bad key".into(),
        };
        let classified = auth.classify("openai");
        assert_eq!(classified.category, ErrorCategory::ModelError);
        assert_eq!(classified.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_truncation_from_finish_reason() {
        let output = StructuredOutput {
            data: serde_json::json!({}),
            usage: TokenUsage::default(),
            finish_reason: Some("length".into()),
            generation_id: None,
        };
        assert!(output.is_truncated());
    }

    #[test]
    fn test_settings_timeouts() {
        let timeouts = ExtractionSettings::default().timeouts();
        assert_eq!(timeouts.render, Duration::from_millis(30_000));
        assert_eq!(timeouts.fetch, Duration::from_secs(30));
        assert_eq!(timeouts.extraction, TimeoutConfig::default().extraction);
        assert_eq!(
            timeouts.extraction,
            Duration::from_secs(extraction::EXTRACTION_TIMEOUT_SECS)
        );
    }
}
