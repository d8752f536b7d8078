//! Page Extractor
//!
//! Drives [`AttemptMachine`] for one URL and one model config. Each
//! `Attempting` state performs a full fetch + extract; the resulting event
//! decides whether to stop, escalate to a browser render, or fail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::state::{AttemptEvent, AttemptMachine, AttemptState};
use super::{
    DynamicFetcher, ExtractRequest, ExtractionSettings, Extractor, ExtractorError, FetchMode,
    FetchedPage, HeuristicProtectionDetector, ProtectionDetector, TokenUsage,
};
use crate::ai::resolver::CandidateConfig;
use crate::ai::timeout::{TimeoutConfig, with_timeout};
use crate::ai::tokenizer::estimate_tokens;
use crate::config::Config;
use crate::constants::resolver::CONTEXT_CAPACITY_RATIO;
use crate::types::{ChainsiftError, ClassifiedError, ErrorCategory};

/// Successful extraction of one page with one model
#[derive(Debug, Clone)]
pub struct PageExtraction {
    pub data: serde_json::Value,
    /// Fetched content, for debug capture only
    pub raw_content: String,
    pub usage: TokenUsage,
    pub generation_id: Option<String>,
    pub fetch_duration: Duration,
    pub extract_duration: Duration,
    pub used_dynamic_fetch: bool,
    /// Escalations performed (0 or 1)
    pub retry_count: u8,
}

/// Terminal failure of one page with one model
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub error: ClassifiedError,
    pub fetch_duration: Duration,
    pub extract_duration: Duration,
    pub used_dynamic_fetch: bool,
    pub retry_count: u8,
}

impl PageFailure {
    pub fn category(&self) -> ErrorCategory {
        self.error.category
    }

    /// Whether the next model in the chain should get this page
    pub fn should_fallback(&self) -> bool {
        self.error.should_fallback()
    }
}

/// Bookkeeping across the attempts of one page
#[derive(Debug, Default)]
struct AttemptLog {
    fetch_duration: Duration,
    extract_duration: Duration,
    used_dynamic_fetch: bool,
    last_error: Option<ClassifiedError>,
}

/// Outcome of a single fetch + extract pass
enum Pass {
    Done(Box<PageExtraction>),
    Failed {
        event: AttemptEvent,
        error: ClassifiedError,
        /// Whether a browser render could plausibly help
        escalatable: bool,
    },
}

impl Pass {
    fn failed(error: ClassifiedError) -> Self {
        Self::Failed {
            event: AttemptEvent::from_category(error.category),
            escalatable: error.is_escalatable(),
            error,
        }
    }
}

pub struct PageExtractor {
    extractor: Arc<dyn Extractor>,
    dynamic: Option<Arc<dyn DynamicFetcher>>,
    detector: Arc<dyn ProtectionDetector>,
    settings: ExtractionSettings,
    timeouts: TimeoutConfig,
    capacity_ratio: f64,
}

impl PageExtractor {
    pub fn new(extractor: Arc<dyn Extractor>, settings: ExtractionSettings) -> Self {
        let timeouts = settings.timeouts();
        Self {
            extractor,
            dynamic: None,
            detector: Arc::new(HeuristicProtectionDetector),
            settings,
            timeouts,
            capacity_ratio: CONTEXT_CAPACITY_RATIO,
        }
    }

    /// Extraction settings and context-capacity ratio from loaded config
    pub fn from_config(extractor: Arc<dyn Extractor>, config: &Config) -> Self {
        Self::new(extractor, config.extraction.clone())
            .with_context_capacity_ratio(config.resolver.context_capacity_ratio)
    }

    /// Without one, escalation is never available
    pub fn with_dynamic_fetcher(mut self, fetcher: Arc<dyn DynamicFetcher>) -> Self {
        self.dynamic = Some(fetcher);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ProtectionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_context_capacity_ratio(mut self, ratio: f64) -> Self {
        self.capacity_ratio = ratio;
        self
    }

    pub fn has_dynamic_fetcher(&self) -> bool {
        self.dynamic.is_some()
    }

    /// Run one page through the state machine with one model config
    #[instrument(skip(self, request, config), fields(provider = %config.provider, model = %config.model))]
    pub async fn extract(
        &self,
        url: &str,
        request: &ExtractRequest,
        config: &CandidateConfig,
    ) -> Result<PageExtraction, PageFailure> {
        let requested = request.fetch_mode.unwrap_or(self.settings.default_fetch_mode);
        let dynamic_available = request.allow_dynamic && self.dynamic.is_some();

        let start = match requested {
            FetchMode::Dynamic if dynamic_available => FetchMode::Dynamic,
            FetchMode::Dynamic => {
                debug!("Dynamic fetch unavailable, starting static");
                FetchMode::Auto
            }
            other => other,
        };
        let may_escalate = dynamic_available && start != FetchMode::Static;

        let mut machine = AttemptMachine::new();
        let mut log = AttemptLog::default();
        machine.apply(AttemptEvent::Start(start), may_escalate);

        loop {
            let AttemptState::Attempting(mode) = machine.state() else {
                break;
            };

            match self.attempt(url, mode, request, config, &mut log).await {
                Pass::Done(mut extraction) => {
                    machine.apply(AttemptEvent::Extracted, false);
                    extraction.retry_count = machine.retry_count();
                    info!(
                        url,
                        retry_count = extraction.retry_count,
                        dynamic = extraction.used_dynamic_fetch,
                        "Page extracted"
                    );
                    return Ok(*extraction);
                }
                Pass::Failed {
                    event,
                    error,
                    escalatable,
                } => {
                    let next = machine.apply(event, may_escalate && escalatable);
                    if next == AttemptState::Attempting(FetchMode::Dynamic) {
                        info!(url, category = %error.category, "Escalating to dynamic fetch");
                    }
                    log.last_error = Some(error);
                }
            }
        }

        let category = match machine.state() {
            AttemptState::Failed(category) => category,
            _ => ErrorCategory::ExtractionError,
        };
        let error = log
            .last_error
            .unwrap_or_else(|| ClassifiedError::new(category, "extraction did not complete"));
        warn!(url, category = %category, error = %error.message, "Page attempt failed");

        Err(PageFailure {
            error: ClassifiedError { category, ..error },
            fetch_duration: log.fetch_duration,
            extract_duration: log.extract_duration,
            used_dynamic_fetch: log.used_dynamic_fetch,
            retry_count: machine.retry_count(),
        })
    }

    /// One fetch + extract pass in the given mode
    async fn attempt(
        &self,
        url: &str,
        mode: FetchMode,
        request: &ExtractRequest,
        config: &CandidateConfig,
        log: &mut AttemptLog,
    ) -> Pass {
        let fetch_started = Instant::now();
        let fetched = match mode {
            FetchMode::Dynamic => {
                log.used_dynamic_fetch = true;
                self.render(url).await
            }
            _ => self.fetch_static(url).await,
        };
        log.fetch_duration += fetch_started.elapsed();

        let page = match fetched {
            Ok(page) => page,
            Err(error) => return Pass::failed(error),
        };

        if let Some(pass) = self.screen(&page) {
            return pass;
        }

        let input_tokens = estimate_tokens(&page.content);
        if let Err(err) =
            crate::ai::resolver::check_context_capacity(config, input_tokens, self.capacity_ratio)
        {
            return Pass::failed(ClassifiedError::with_provider(
                err.category(),
                err.to_string(),
                config.provider.clone(),
            ));
        }

        let extract_started = Instant::now();
        let output = with_timeout(
            self.timeouts.extraction,
            async {
                self.extractor
                    .extract_structured(&page.content, &request.schema, config)
                    .await
                    .map_err(|e| {
                        let classified = e.classify(&config.provider);
                        ChainsiftError::Page {
                            url: url.to_string(),
                            category: classified.category,
                            message: classified.message,
                        }
                    })
            },
            "structured extraction",
        )
        .await;
        log.extract_duration += extract_started.elapsed();

        let output = match output {
            Ok(output) => output,
            Err(ChainsiftError::Timeout { .. }) => {
                return Pass::failed(ClassifiedError::with_provider(
                    ErrorCategory::ModelError,
                    "structured extraction timed out",
                    config.provider.clone(),
                ));
            }
            Err(err) => {
                return Pass::failed(ClassifiedError::with_provider(
                    err.category(),
                    page_message(err),
                    config.provider.clone(),
                ));
            }
        };

        if output.is_truncated() {
            return Pass::failed(ClassifiedError::with_provider(
                ErrorCategory::LlmTruncation,
                format!(
                    "output truncated after {} tokens (limit {})",
                    output.usage.output_tokens, config.max_output_tokens
                ),
                config.provider.clone(),
            ));
        }

        let mut usage = output.usage;
        if usage.input_tokens == 0 {
            usage.input_tokens = input_tokens;
        }

        Pass::Done(Box::new(PageExtraction {
            data: output.data,
            raw_content: page.content,
            usage,
            generation_id: output.generation_id,
            fetch_duration: log.fetch_duration,
            extract_duration: log.extract_duration,
            used_dynamic_fetch: log.used_dynamic_fetch,
            retry_count: 0,
        }))
    }

    async fn fetch_static(&self, url: &str) -> Result<FetchedPage, ClassifiedError> {
        let result = with_timeout(
            self.timeouts.fetch,
            async { Ok(self.extractor.fetch(url, FetchMode::Static).await) },
            "page fetch",
        )
        .await;

        settle_fetch(url, result)
    }

    async fn render(&self, url: &str) -> Result<FetchedPage, ClassifiedError> {
        let Some(fetcher) = &self.dynamic else {
            return Err(ClassifiedError::new(
                ErrorCategory::FetchError,
                "no dynamic fetcher configured",
            ));
        };

        let timeout_ms = self.settings.dynamic_render_timeout_ms;
        let result = with_timeout(
            self.timeouts.render,
            async { Ok(fetcher.render(url, timeout_ms).await.map(FetchedPage::ok)) },
            "dynamic render",
        )
        .await;

        settle_fetch(url, result)
    }

    /// Protection and content-size checks on a fetched page
    fn screen(&self, page: &FetchedPage) -> Option<Pass> {
        let detection = self
            .detector
            .detect(page.status, &page.headers, &page.content);

        let signal = detection
            .signal
            .clone()
            .or_else(|| page.signals.first().cloned());
        if detection.detected || !page.signals.is_empty() {
            let signal = signal.unwrap_or_else(|| "unknown".to_string());
            return Some(Pass::Failed {
                event: AttemptEvent::BotProtection,
                error: ClassifiedError::new(
                    ErrorCategory::BotProtection,
                    format!("bot protection detected ({})", signal),
                ),
                escalatable: detection.retryable || !detection.detected,
            });
        }

        if page.status >= 400 {
            return Some(Pass::failed(ClassifiedError::new(
                ErrorCategory::FetchError,
                format!("HTTP {}", page.status),
            )));
        }

        let chars = page.content.trim().chars().count();
        if chars < self.settings.min_content_chars {
            return Some(Pass::failed(ClassifiedError::new(
                ErrorCategory::InsufficientContent,
                format!(
                    "{} characters, need at least {}",
                    chars, self.settings.min_content_chars
                ),
            )));
        }

        None
    }
}

fn page_message(err: ChainsiftError) -> String {
    match err {
        ChainsiftError::Page { message, .. } => message,
        other => other.to_string(),
    }
}

/// Flatten a timed fetch; the extractor's own classification is kept whole
fn settle_fetch(
    url: &str,
    result: crate::types::Result<Result<FetchedPage, ExtractorError>>,
) -> Result<FetchedPage, ClassifiedError> {
    match result {
        Ok(fetched) => fetched.map_err(|e| e.classify("")),
        Err(ChainsiftError::Timeout { .. }) => Err(ClassifiedError::new(
            ErrorCategory::FetchError,
            format!("{} timed out", url),
        )),
        Err(other) => Err(ClassifiedError::new(other.category(), page_message(other))),
    }
}
