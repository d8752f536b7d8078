//! Heuristic Bot-Protection Detection

use std::collections::HashMap;

use super::{Detection, ProtectionDetector};

/// Body markers specific to challenge interstitials
const CHALLENGE_MARKERS: &[&str] = &[
    "captcha",
    "checking your browser",
    "cf-challenge",
    "just a moment...",
];

/// Phrases ordinary pages also carry (noscript fallbacks, paywall notices);
/// they only count alongside a blocking status
const BLOCKING_MARKERS: &[&str] = &["enable javascript", "access denied"];

/// Challenge pages are small; large pages mentioning these words are content
const MAX_CHALLENGE_BODY_CHARS: usize = 20_000;

/// Recognises challenge pages by header, status code and body markers
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicProtectionDetector;

impl HeuristicProtectionDetector {
    fn header_signal(headers: &HashMap<String, String>) -> Option<String> {
        headers.keys().find_map(|name| {
            let lower = name.to_lowercase();
            (lower == "cf-mitigated" || lower.starts_with("cf-chl") || lower == "x-datadome")
                .then_some(lower)
        })
    }

    fn body_marker(lower: &str, markers: &[&'static str]) -> Option<&'static str> {
        markers.iter().copied().find(|m| lower.contains(m))
    }
}

impl ProtectionDetector for HeuristicProtectionDetector {
    fn detect(&self, status: u16, headers: &HashMap<String, String>, body: &str) -> Detection {
        if let Some(header) = Self::header_signal(headers) {
            return Detection::found(header, true);
        }

        let blocking_status = matches!(status, 403 | 429 | 503);
        let lower = body.to_lowercase();
        let challenge = Self::body_marker(&lower, CHALLENGE_MARKERS);

        if blocking_status {
            // A browser will not get past a rate limit
            if status == 429 {
                return Detection::found("http_429", false);
            }
            let marker = challenge.or_else(|| Self::body_marker(&lower, BLOCKING_MARKERS));
            return match marker {
                Some(marker) => Detection::found(marker, true),
                None => Detection::found(format!("http_{}", status), true),
            };
        }

        match challenge {
            Some(marker) if body.chars().count() <= MAX_CHALLENGE_BODY_CHARS => {
                Detection::found(marker, true)
            }
            _ => Detection::clear(),
        }
    }
}
