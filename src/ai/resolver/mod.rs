//! Model Chain Resolution
//!
//! Turns a caller identity, a tier and two feature flags into an ordered list
//! of usable (provider, model, key) candidates.
//!
//! ## Resolution Matrix
//!
//! Evaluated top to bottom, first non-empty chain wins:
//!
//! 1. Explicit override (honored only when BYOK is allowed)
//! 2. BYOK + custom models: caller's chain, caller's keys
//! 3. Custom models only: caller's chain, operator keys
//! 4. BYOK only: operator tier chain, caller keys where the caller has them
//! 5. Default: operator tier chain, operator keys
//!
//! ## Modules
//!
//! - `engine`: the resolver itself
//! - `store`: key and chain store traits with in-memory implementations

mod engine;
mod store;

pub use engine::ConfigResolver;
pub(crate) use engine::check_context_capacity;
pub use store::{ChainStore, KeyStore, MemoryChainStore, MemoryKeyStore};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

// =============================================================================
// Chain Entries
// =============================================================================

/// One (provider, model) slot in a stored chain
///
/// Optional fields are pins: when set they win over anything the pricing
/// catalogue or provider registry reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_json: Option<bool>,
}

impl ChainEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into().to_lowercase(),
            model: model.into(),
            base_url: None,
            max_output_tokens: None,
            context_length: None,
            strict_json: None,
        }
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_context_length(mut self, tokens: u32) -> Self {
        self.context_length = Some(tokens);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Caller-supplied override slot, optionally carrying its own key
#[derive(Debug, Clone)]
pub struct OverrideEntry {
    pub entry: ChainEntry,
    pub api_key: Option<SecretString>,
}

impl OverrideEntry {
    pub fn new(entry: ChainEntry) -> Self {
        Self {
            entry,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }
}

// =============================================================================
// Candidate Configs
// =============================================================================

/// Whose credential a candidate uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Caller,
    Operator,
    NoAuth,
}

/// Fully resolved model configuration for one attempt
///
/// Built by [`ConfigResolver`]; the chain hands out shared references only.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateConfig {
    pub provider: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    pub key_source: KeySource,
    pub base_url: Option<String>,
    pub max_output_tokens: u32,
    pub context_length: Option<u32>,
    pub strict_json: bool,
}

impl CandidateConfig {
    /// Keyless candidate with default limits, mostly for tests and local providers
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            key_source: KeySource::NoAuth,
            base_url: None,
            max_output_tokens: crate::constants::resolver::DEFAULT_MAX_OUTPUT_TOKENS,
            context_length: None,
            strict_json: false,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>, source: KeySource) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self.key_source = source;
        self
    }

    pub fn with_context_length(mut self, tokens: u32) -> Self {
        self.context_length = Some(tokens);
        self
    }

    /// "provider/model" label for logs
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

// =============================================================================
// Config Chain
// =============================================================================

/// Which matrix branch produced a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionBranch {
    Override,
    CallerChainCallerKeys,
    CallerChainOperatorKeys,
    TierChainCallerKeys,
    TierChainOperatorKeys,
}

/// Ordered candidates for one request
#[derive(Debug, Clone, Serialize)]
pub struct ConfigChain {
    configs: Vec<CandidateConfig>,
    is_byok: bool,
    branch: ResolutionBranch,
}

impl ConfigChain {
    /// BYOK when non-empty and no candidate spends operator credentials
    pub fn new(configs: Vec<CandidateConfig>, branch: ResolutionBranch) -> Self {
        let is_byok = !configs.is_empty()
            && configs
                .iter()
                .all(|c| c.key_source != KeySource::Operator);
        Self {
            configs,
            is_byok,
            branch,
        }
    }

    pub fn is_byok(&self) -> bool {
        self.is_byok
    }

    pub fn branch(&self) -> ResolutionBranch {
        self.branch
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CandidateConfig> {
        self.configs.get(index)
    }

    pub fn configs(&self) -> &[CandidateConfig] {
        &self.configs
    }

    /// Walk the chain from the start with "attempt N of M" numbering
    pub fn cursor(&self) -> ChainCursor<'_> {
        ChainCursor {
            configs: &self.configs,
            position: 0,
        }
    }
}

/// One step of a chain walk
#[derive(Debug, Clone, Copy)]
pub struct ChainAttempt<'a> {
    /// 1-based
    pub number: usize,
    pub total: usize,
    pub config: &'a CandidateConfig,
}

impl ChainAttempt<'_> {
    pub fn has_next(&self) -> bool {
        self.number < self.total
    }
}

#[derive(Debug, Clone)]
pub struct ChainCursor<'a> {
    configs: &'a [CandidateConfig],
    position: usize,
}

impl ChainCursor<'_> {
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for ChainCursor<'a> {
    type Item = ChainAttempt<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let config = self.configs.get(self.position)?;
        self.position += 1;
        Some(ChainAttempt {
            number: self.position,
            total: self.configs.len(),
            config,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.configs.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChainCursor<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_entry_deserializes_pins() {
        let entry: ChainEntry = toml::from_str(
            r#"
            provider = "openai"
            model = "gpt-4o"
            max_output_tokens = 2048
            "#,
        )
        .unwrap();
        assert_eq!(entry.max_output_tokens, Some(2048));
        assert!(entry.context_length.is_none());
    }

    #[test]
    fn test_byok_flag() {
        let caller = CandidateConfig::new("openai", "gpt-4o").with_key("sk-c", KeySource::Caller);
        let operator =
            CandidateConfig::new("anthropic", "claude-3-haiku").with_key("sk-o", KeySource::Operator);
        let local = CandidateConfig::new("ollama", "llama3.1");

        let chain = ConfigChain::new(vec![caller.clone(), local], ResolutionBranch::Override);
        assert!(chain.is_byok());

        let mixed = ConfigChain::new(vec![caller, operator], ResolutionBranch::TierChainCallerKeys);
        assert!(!mixed.is_byok());

        let empty = ConfigChain::new(Vec::new(), ResolutionBranch::TierChainOperatorKeys);
        assert!(!empty.is_byok());
    }

    #[test]
    fn test_cursor_numbers_attempts() {
        let chain = ConfigChain::new(
            vec![
                CandidateConfig::new("a", "m1"),
                CandidateConfig::new("b", "m2"),
            ],
            ResolutionBranch::TierChainOperatorKeys,
        );

        let mut cursor = chain.cursor();
        assert_eq!(cursor.len(), 2);

        let first = cursor.next().unwrap();
        assert_eq!((first.number, first.total), (1, 2));
        assert!(first.has_next());

        let second = cursor.next().unwrap();
        assert_eq!(second.config.provider, "b");
        assert!(!second.has_next());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_serialized_candidate_has_no_key() {
        let config = CandidateConfig::new("openai", "gpt-4o").with_key("sk-secret", KeySource::Caller);
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
