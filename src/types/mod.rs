pub mod error;

pub use error::{ChainsiftError, ClassifiedError, ErrorCategory, ErrorClassifier, Result};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Type-safe wrapper for caller identities
///
/// Prevents accidental mixing of caller IDs with provider or model names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Subscription tier name (lowercased on construction)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Tier {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_normalized() {
        assert_eq!(Tier::new(" Pro ").as_str(), "pro");
        assert_eq!(Tier::from("FREE"), Tier::new("free"));
    }

    #[test]
    fn test_caller_id_display() {
        let id = CallerId::from("user-42");
        assert_eq!(id.to_string(), "user-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-42\"");
    }
}
