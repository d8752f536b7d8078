//! URL Normalization
//!
//! Deduplication key for discovered URLs: lowercase scheme and host, no
//! fragment, no trailing slash (except the root path). Query strings are
//! kept as-is since they usually select different content.

use url::Url;

use crate::types::{ChainsiftError, Result};

/// Parse and normalize an absolute http(s) URL
///
/// ```
/// use chainsift::crawl::normalize_url;
///
/// let url = normalize_url("https://X.com/a/#top").unwrap();
/// assert_eq!(url.as_str(), "https://x.com/a");
/// ```
pub fn normalize_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;
    normalize(url)
}

/// Normalize an already-parsed URL
pub fn normalize(mut url: Url) -> Result<Url> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ChainsiftError::Discovery {
            url: url.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ChainsiftError::Discovery {
            url: url.to_string(),
            message: "missing host".to_string(),
        });
    }

    // The url crate already lowercases scheme and host for http(s)
    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        let trimmed = trimmed.to_string();
        url.set_path(&trimmed);
    }

    Ok(url)
}

/// Dedup key for a raw URL string
pub fn normalized_key(raw: &str) -> Result<String> {
    normalize_url(raw).map(String::from)
}

/// Same scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Resolve an href against its page, dropping non-navigational links
pub fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    base.join(href).ok().and_then(|url| normalize(url).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_and_trailing_slash_collapse() {
        assert_eq!(
            normalized_key("https://x.com/a").unwrap(),
            normalized_key("https://X.com/a/").unwrap()
        );
        assert_eq!(
            normalized_key("http://a.com/x").unwrap(),
            normalized_key("http://a.com/x/").unwrap()
        );
    }

    #[test]
    fn test_fragment_stripped() {
        let url = normalize_url("https://example.com/docs#install").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs");
    }

    #[test]
    fn test_root_keeps_slash() {
        let url = normalize_url("https://Example.com").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_query_preserved() {
        let url = normalize_url("https://example.com/list/?page=2").unwrap();
        assert_eq!(url.as_str(), "https://example.com/list?page=2");
    }

    #[test]
    fn test_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_err());
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        assert_eq!(
            resolve_link("../about/", &base).unwrap().as_str(),
            "https://example.com/about"
        );
        assert!(resolve_link("#comments", &base).is_none());
        assert!(resolve_link("mailto:me@example.com", &base).is_none());
        assert!(resolve_link("JavaScript:void(0)", &base).is_none());
    }

    #[test]
    fn test_same_origin() {
        let a = Url::parse("https://example.com/a").unwrap();
        let b = Url::parse("https://EXAMPLE.com/b").unwrap();
        let c = Url::parse("http://example.com/a").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(
            host in "[a-z]{1,10}\\.(com|org|io)",
            segments in proptest::collection::vec("[a-zA-Z0-9_-]{1,8}", 0..5),
            trailing in any::<bool>(),
            fragment in proptest::option::of("[a-z]{1,6}"),
        ) {
            let mut raw = format!("https://{}/{}", host.to_uppercase(), segments.join("/"));
            if trailing {
                raw.push('/');
            }
            if let Some(fragment) = fragment {
                raw.push('#');
                raw.push_str(&fragment);
            }

            let once = normalize_url(&raw).unwrap();
            let twice = normalize_url(once.as_str()).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.fragment().is_none());
            prop_assert!(once.path() == "/" || !once.path().ends_with('/'));
            prop_assert_eq!(once.host_str(), Some(host.as_str()));
        }
    }
}
