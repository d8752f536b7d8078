//! Hardcoded Per-Family Prices
//!
//! Used only when neither the pricing catalogue nor the provider itself can
//! price a model. Matching is by substring on the lowercased model name, first
//! match wins, so more specific families come first.

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackPrice {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl FallbackPrice {
    const fn new(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.prompt_per_million
            + output_tokens as f64 * self.completion_per_million)
            / 1_000_000.0
    }
}

const FREE: FallbackPrice = FallbackPrice::new(0.0, 0.0);

/// Unknown models are priced like a mid-range frontier model so budget checks
/// err on the side of stopping early.
const DEFAULT_PRICE: FallbackPrice = FallbackPrice::new(2.5, 10.0);

const FAMILY_PRICES: &[(&str, FallbackPrice)] = &[
    (":free", FREE),
    ("gpt-4o-mini", FallbackPrice::new(0.15, 0.6)),
    ("gpt-4o", FallbackPrice::new(2.5, 10.0)),
    ("gpt-4.1-mini", FallbackPrice::new(0.4, 1.6)),
    ("gpt-4.1", FallbackPrice::new(2.0, 8.0)),
    ("gpt-4-turbo", FallbackPrice::new(10.0, 30.0)),
    ("gpt-4", FallbackPrice::new(30.0, 60.0)),
    ("gpt-3.5", FallbackPrice::new(0.5, 1.5)),
    ("claude-3-opus", FallbackPrice::new(15.0, 75.0)),
    ("claude-opus", FallbackPrice::new(15.0, 75.0)),
    ("claude-3-5-haiku", FallbackPrice::new(0.8, 4.0)),
    ("claude-3-haiku", FallbackPrice::new(0.25, 1.25)),
    ("sonnet", FallbackPrice::new(3.0, 15.0)),
    ("gemini-1.5-flash", FallbackPrice::new(0.075, 0.3)),
    ("gemini-2.0-flash", FallbackPrice::new(0.1, 0.4)),
    ("llama", FallbackPrice::new(0.2, 0.2)),
    ("mistral", FallbackPrice::new(0.25, 0.25)),
];

/// Family price for a model name
pub fn fallback_price(model: &str) -> FallbackPrice {
    let lower = model.to_lowercase();
    FAMILY_PRICES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

/// Estimated USD cost for a call using the family table
pub fn fallback_estimate(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    fallback_price(model).cost(input_tokens, output_tokens)
}
