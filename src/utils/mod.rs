//! Utility functions and helpers.

pub mod http;

use sha2::{Digest, Sha256};
use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Extract the domain from a URL string.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Stable key for a (site, url) pair, used as the job id.
///
/// A NUL separator keeps distinct pairs from colliding when one string is
/// a prefix of the other.
pub fn job_key(site: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_relative() {
        let base = Url::parse("https://example.com/dir/").unwrap();
        assert_eq!(
            resolve_url(&base, "file.json"),
            "https://example.com/dir/file.json"
        );
    }

    #[test]
    fn test_resolve_url_absolute() {
        let base = Url::parse("https://example.com/dir/").unwrap();
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_get_domain() {
        assert_eq!(
            get_domain("https://example.com/a/b"),
            Some("example.com".to_string())
        );
        assert_eq!(get_domain("not a url"), None);
    }

    #[test]
    fn test_job_key_separator_prevents_collisions() {
        assert_ne!(job_key("ab", "c"), job_key("a", "bc"));
    }
}
