//! Input Token Estimation
//!
//! Rough counts used by the context-capacity pre-check and for pricing pages
//! whose extractor did not report usage. Exact tokenization is the
//! provider's business; these only need to be in the right ballpark.

use crate::constants::extraction::CHARS_PER_TOKEN;

/// Character-based estimate, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}
