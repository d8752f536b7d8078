//! Unified Error Type System
//!
//! Centralized error types for the orchestration layer.
//! Provides error classification for escalation and model-fallback decisions.
//!
//! ## Error Categories
//!
//! - **ConfigError**: No usable model chain (fatal for the request)
//! - **FetchError**: Network/HTTP failure fetching a page (per-page)
//! - **BotProtection / InsufficientContent**: Escalate to a dynamic fetch once
//! - **LlmTruncation / ModelError**: Terminal for the model, try the next one
//! - **ExtractionError**: Catch-all terminal per-page failure
//! - **InsufficientBalance / CallbackError**: Planned stops for the remaining crawl

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories used for routing, escalation and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No usable model chain could be resolved
    ConfigError,
    /// Network/HTTP failure while fetching the page
    FetchError,
    /// Anti-bot challenge detected in the response
    BotProtection,
    /// Page content too small to extract from
    InsufficientContent,
    /// Model output was cut off at its token limit
    LlmTruncation,
    /// Failure tied to the current model or provider (auth, rate limit, context size)
    ModelError,
    /// Anything else
    ExtractionError,
    /// Projected spend would exceed the available balance
    InsufficientBalance,
    /// A result callback requested termination
    CallbackError,
}

impl ErrorCategory {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "config_error",
            Self::FetchError => "fetch_error",
            Self::BotProtection => "bot_protection",
            Self::InsufficientContent => "insufficient_content",
            Self::LlmTruncation => "llm_truncation",
            Self::ModelError => "model_error",
            Self::ExtractionError => "extraction_error",
            Self::InsufficientBalance => "insufficient_balance",
            Self::CallbackError => "callback_error",
        }
    }

    /// Whether a dynamic (browser-rendered) re-fetch may resolve this failure
    pub fn is_escalatable(&self) -> bool {
        matches!(self, Self::BotProtection | Self::InsufficientContent)
    }

    /// Whether the next model in the chain should be tried for the same page
    pub fn should_fallback(&self) -> bool {
        matches!(self, Self::LlmTruncation | Self::ModelError)
    }

    /// Whether the category ends the remaining crawl rather than a single page
    pub fn stops_crawl(&self) -> bool {
        matches!(self, Self::InsufficientBalance | Self::CallbackError)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Classified Failure
// =============================================================================

/// A failure message tagged with its category and optional provider context
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub provider: Option<String>,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for ClassifiedError {}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn should_fallback(&self) -> bool {
        self.category.should_fallback()
    }

    /// Escalatable category, unless the failure asked to wait it out
    pub fn is_escalatable(&self) -> bool {
        self.category.is_escalatable() && self.retry_after.is_none()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps provider and extractor failure text to an [`ErrorCategory`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a failure message coming back from an LLM call
    pub fn classify(message: &str, provider: &str) -> ClassifiedError {
        let lower = message.to_lowercase();

        // Output cut off at the token limit
        if lower.contains("truncat")
            || lower.contains("finish_reason: length")
            || lower.contains("finish_reason=length")
            || lower.contains("max_tokens reached")
            || lower.contains("unexpected end of json")
        {
            return ClassifiedError::with_provider(ErrorCategory::LlmTruncation, message, provider);
        }

        // Anti-bot challenge surfaced through the extractor
        if lower.contains("captcha")
            || lower.contains("cloudflare")
            || lower.contains("challenge")
            || lower.contains("checking your browser")
        {
            return ClassifiedError::with_provider(ErrorCategory::BotProtection, message, provider);
        }

        if lower.contains("insufficient content") || lower.contains("content too short") {
            return ClassifiedError::with_provider(
                ErrorCategory::InsufficientContent,
                message,
                provider,
            );
        }

        // Rate limiting is model-specific: another provider may still have quota
        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return ClassifiedError::with_provider(ErrorCategory::ModelError, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        if lower.contains("context length")
            || lower.contains("context window")
            || lower.contains("maximum context")
            || (lower.contains("token") && lower.contains("exceed"))
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("model not found")
            || lower.contains("no such model")
            || lower.contains("service unavailable")
            || lower.contains("overloaded")
            || lower.contains("502")
            || lower.contains("503")
        {
            return ClassifiedError::with_provider(ErrorCategory::ModelError, message, provider);
        }

        ClassifiedError::with_provider(ErrorCategory::ExtractionError, message, provider)
    }

    /// Classify an LLM provider HTTP status code
    pub fn classify_llm_status(status: u16, message: &str, provider: &str) -> ClassifiedError {
        match status {
            429 => ClassifiedError::with_provider(ErrorCategory::ModelError, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 402 | 403 | 404 | 408 | 500..=599 => {
                ClassifiedError::with_provider(ErrorCategory::ModelError, message, provider)
            }
            _ => Self::classify(message, provider),
        }
    }

    /// Classify a page-fetch HTTP status code
    pub fn classify_fetch_status(status: u16, message: &str) -> ClassifiedError {
        match status {
            // A browser will not get past a rate limit either
            429 => ClassifiedError::new(ErrorCategory::BotProtection, message)
                .retry_after(Duration::from_secs(30)),
            403 | 503 => ClassifiedError::new(ErrorCategory::BotProtection, message),
            _ => ClassifiedError::new(ErrorCategory::FetchError, message),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ChainsiftError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    // -------------------------------------------------------------------------
    // Resolution Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    /// Every resolution branch came up empty
    #[error("No models configured for tier '{tier}'")]
    NoModelsConfigured { tier: String },

    #[error(
        "Input of ~{input_tokens} tokens exceeds {limit_tokens} tokens ({pct}% of {provider}/{model} context of {context_length})"
    )]
    ContextCapacity {
        provider: String,
        model: String,
        input_tokens: u64,
        limit_tokens: u64,
        context_length: u64,
        pct: u8,
    },

    // -------------------------------------------------------------------------
    // Pricing / Discovery Errors
    // -------------------------------------------------------------------------
    #[error("Pricing error: {0}")]
    Pricing(String),

    #[error("Discovery error for {url}: {message}")]
    Discovery { url: String, message: String },

    // -------------------------------------------------------------------------
    // Page Errors
    // -------------------------------------------------------------------------
    /// Per-page failure, surfaced at request level when no page succeeded
    #[error("Page {url} failed ({category}): {message}")]
    Page {
        url: String,
        category: ErrorCategory,
        message: String,
    },

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

pub type Result<T> = std::result::Result<T, ChainsiftError>;

impl ChainsiftError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Category used when this error is recorded against a page or request
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::NoModelsConfigured { .. } => ErrorCategory::ConfigError,
            Self::ContextCapacity { .. } => ErrorCategory::ModelError,
            Self::Page { category, .. } => *category,
            Self::Http(_) | Self::Timeout { .. } | Self::Discovery { .. } => {
                ErrorCategory::FetchError
            }
            _ => ErrorCategory::ExtractionError,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
