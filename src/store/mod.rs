// src/store/mod.rs

//! Durable per-site crawl state.
//!
//! The store is the ledger both the scheduler and the worker pool consult:
//! which URLs have been admitted as jobs, which are crawled, per-site
//! counters and pause flags, and the dead-letter log. Implementations must
//! provide single-writer-per-key semantics for mutations; in-process memory
//! is never authoritative for anything except the admitted markers, whose
//! loss can only produce a duplicate job (absorbed by the crawled check).

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DeadLetter, DiscoveredUrl, SiteStatus};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Job store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Concurrent write detected; retry with the latest read.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// Backing storage unreachable or failing.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be parsed.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Narrow interface over the status ledger and crawl records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Ensure the site exists and grow `total_urls` by `count` newly
    /// admitted URLs. `total_urls` never decreases.
    async fn record_discovered(&self, site: &str, count: u64) -> Result<(), StoreError>;

    /// Current status for one site, if known.
    async fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError>;

    /// Status of every known site.
    async fn list_sites(&self) -> Result<Vec<SiteStatus>, StoreError>;

    /// Flip the pause flag, creating the site if needed. Returns the new
    /// value.
    async fn toggle_paused(&self, site: &str) -> Result<bool, StoreError>;

    /// Mark a (site, url) pair admitted (turned into a job or terminal).
    /// Returns false if it was already admitted.
    async fn admit_url(&self, site: &str, url: &str) -> Result<bool, StoreError>;

    /// Remove an admitted marker whose job could not be enqueued, so a
    /// later submission can admit the URL again.
    async fn revoke_url(&self, site: &str, url: &str) -> Result<(), StoreError>;

    /// Whether the pair has been successfully crawled.
    async fn is_crawled(&self, site: &str, url: &str) -> Result<bool, StoreError>;

    /// Record a successful completion: insert the crawled record and bump
    /// `crawled_urls` in one logically atomic update. Returns false if the
    /// pair was already crawled (duplicate delivery) or the site has been
    /// removed; counters are untouched in both cases.
    async fn complete_url(&self, site: &str, url: &str) -> Result<bool, StoreError>;

    /// Buffer URLs admitted while the site is paused.
    async fn buffer_paused(&self, site: &str, urls: &[DiscoveredUrl]) -> Result<(), StoreError>;

    /// Drain the paused buffer for a site.
    async fn take_paused(&self, site: &str) -> Result<Vec<DiscoveredUrl>, StoreError>;

    /// Append to the dead-letter log.
    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<(), StoreError>;

    /// Dead letters recorded for a site.
    async fn dead_letters(&self, site: &str) -> Result<Vec<DeadLetter>, StoreError>;

    /// Delete the site's status, crawl records, buffers and dead letters.
    async fn remove_site(&self, site: &str) -> Result<(), StoreError>;
}
