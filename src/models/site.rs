// src/models/site.rs

//! Per-site crawl status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable status record for one site.
///
/// `total_urls` counts URLs admitted by the scheduler and `crawled_urls`
/// counts successful completions; both only move forward. During
/// incremental discovery `crawled_urls` may transiently exceed
/// `total_urls` and readers must tolerate that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteStatus {
    /// Site identifier (normally the site's base URL)
    pub site: String,

    /// URLs discovered and admitted so far
    pub total_urls: u64,

    /// URLs successfully crawled and indexed
    pub crawled_urls: u64,

    /// Whether dispatch for this site is paused
    pub paused: bool,

    /// Timestamp of the last mutation
    pub last_updated: DateTime<Utc>,
}

impl SiteStatus {
    /// Create a fresh record for a newly discovered site.
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            total_urls: 0,
            crawled_urls: 0,
            paused: false,
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_site_starts_empty_and_unpaused() {
        let status = SiteStatus::new("https://example.com");
        assert_eq!(status.total_urls, 0);
        assert_eq!(status.crawled_urls, 0);
        assert!(!status.paused);
    }
}
