//! Timeout Wrappers for External Calls
//!
//! Every network call into an external collaborator (page fetch, browser
//! render, structured extraction) runs under a deadline so a hung
//! dependency turns into a classified per-page failure.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::with_timeout;
//!
//! let html = with_timeout(
//!     Duration::from_millis(30_000),
//!     async { fetcher.render(url, 30_000).await },
//!     "dynamic render",
//! )
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::constants::{extraction, network};
use crate::types::{ChainsiftError, Result};

/// Deadlines for the operations this layer waits on
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Static page fetch
    pub fetch: Duration,
    /// Browser-rendered fetch
    pub render: Duration,
    /// Structured LLM extraction
    pub extraction: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(network::DEFAULT_TIMEOUT_SECS),
            render: Duration::from_millis(extraction::DYNAMIC_RENDER_TIMEOUT_MS),
            extraction: Duration::from_secs(extraction::EXTRACTION_TIMEOUT_SECS),
        }
    }
}

/// Execute an async operation with a timeout
///
/// Returns a timeout error if the operation doesn't complete within the specified duration.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ChainsiftError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.fetch.as_secs(), 30);
        assert_eq!(config.render.as_millis(), 30_000);
        assert!(config.extraction > config.fetch);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, ChainsiftError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ChainsiftError>(42)
            },
            "slow operation",
        )
        .await;
        assert!(matches!(result.unwrap_err(), ChainsiftError::Timeout { .. }));
    }
}
