// src/store/memory.rs

//! In-memory job store.
//!
//! Single-process store for tests and local development. Every mutation is
//! a short critical section behind one mutex per store; nothing suspends
//! while the lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{DeadLetter, DiscoveredUrl, SiteStatus};
use crate::store::{JobStore, StoreError};

#[derive(Debug)]
struct SiteEntry {
    status: SiteStatus,
    admitted: HashSet<String>,
    crawled: HashSet<String>,
    paused_buffer: Vec<DiscoveredUrl>,
}

impl SiteEntry {
    fn new(site: &str) -> Self {
        Self {
            status: SiteStatus::new(site),
            admitted: HashSet::new(),
            crawled: HashSet::new(),
            paused_buffer: Vec::new(),
        }
    }
}

/// In-memory store backend.
#[derive(Default)]
pub struct MemoryStore {
    sites: Mutex<HashMap<String, SiteEntry>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_site<T>(&self, site: &str, f: impl FnOnce(&mut SiteEntry) -> T) -> T {
        let mut sites = self.sites.lock().expect("store mutex poisoned");
        let entry = sites
            .entry(site.to_string())
            .or_insert_with(|| SiteEntry::new(site));
        entry.status.last_updated = Utc::now();
        f(entry)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn record_discovered(&self, site: &str, count: u64) -> Result<(), StoreError> {
        self.with_site(site, |entry| {
            entry.status.total_urls += count;
        });
        Ok(())
    }

    async fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError> {
        let sites = self.sites.lock().expect("store mutex poisoned");
        Ok(sites.get(site).map(|entry| entry.status.clone()))
    }

    async fn list_sites(&self) -> Result<Vec<SiteStatus>, StoreError> {
        let sites = self.sites.lock().expect("store mutex poisoned");
        let mut statuses: Vec<_> = sites.values().map(|entry| entry.status.clone()).collect();
        statuses.sort_by(|a, b| a.site.cmp(&b.site));
        Ok(statuses)
    }

    async fn toggle_paused(&self, site: &str) -> Result<bool, StoreError> {
        Ok(self.with_site(site, |entry| {
            entry.status.paused = !entry.status.paused;
            entry.status.paused
        }))
    }

    async fn admit_url(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        Ok(self.with_site(site, |entry| entry.admitted.insert(url.to_string())))
    }

    async fn revoke_url(&self, site: &str, url: &str) -> Result<(), StoreError> {
        let mut sites = self.sites.lock().expect("store mutex poisoned");
        if let Some(entry) = sites.get_mut(site) {
            entry.admitted.remove(url);
        }
        Ok(())
    }

    async fn is_crawled(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        let sites = self.sites.lock().expect("store mutex poisoned");
        Ok(sites
            .get(site)
            .map(|entry| entry.crawled.contains(url))
            .unwrap_or(false))
    }

    async fn complete_url(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        let mut sites = self.sites.lock().expect("store mutex poisoned");
        // Completion against a removed site is a no-op.
        let Some(entry) = sites.get_mut(site) else {
            return Ok(false);
        };
        if !entry.crawled.insert(url.to_string()) {
            return Ok(false);
        }
        entry.status.crawled_urls += 1;
        entry.status.last_updated = Utc::now();
        Ok(true)
    }

    async fn buffer_paused(&self, site: &str, urls: &[DiscoveredUrl]) -> Result<(), StoreError> {
        self.with_site(site, |entry| {
            entry.paused_buffer.extend(urls.iter().cloned());
        });
        Ok(())
    }

    async fn take_paused(&self, site: &str) -> Result<Vec<DiscoveredUrl>, StoreError> {
        let mut sites = self.sites.lock().expect("store mutex poisoned");
        Ok(sites
            .get_mut(site)
            .map(|entry| std::mem::take(&mut entry.paused_buffer))
            .unwrap_or_default())
    }

    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<(), StoreError> {
        self.dead_letters
            .lock()
            .expect("store mutex poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn dead_letters(&self, site: &str) -> Result<Vec<DeadLetter>, StoreError> {
        let dead = self.dead_letters.lock().expect("store mutex poisoned");
        Ok(dead.iter().filter(|d| d.site == site).cloned().collect())
    }

    async fn remove_site(&self, site: &str) -> Result<(), StoreError> {
        self.sites
            .lock()
            .expect("store mutex poisoned")
            .remove(site);
        self.dead_letters
            .lock()
            .expect("store mutex poisoned")
            .retain(|d| d.site != site);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://example.com";

    #[tokio::test]
    async fn test_admit_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.admit_url(SITE, "https://example.com/a").await.unwrap());
        assert!(!store.admit_url(SITE, "https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_bumps_counter_once() {
        let store = MemoryStore::new();
        store.record_discovered(SITE, 1).await.unwrap();
        assert!(store.complete_url(SITE, "https://example.com/a").await.unwrap());
        assert!(!store.complete_url(SITE, "https://example.com/a").await.unwrap());

        let status = store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 1);
        assert_eq!(status.crawled_urls, 1);
        assert!(store.is_crawled(SITE, "https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_against_removed_site_is_noop() {
        let store = MemoryStore::new();
        assert!(!store.complete_url(SITE, "https://example.com/a").await.unwrap());
        assert!(store.site_status(SITE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_toggle_paused() {
        let store = MemoryStore::new();
        assert!(store.toggle_paused(SITE).await.unwrap());
        assert!(!store.toggle_paused(SITE).await.unwrap());
    }

    #[tokio::test]
    async fn test_paused_buffer_drains_once() {
        let store = MemoryStore::new();
        store
            .buffer_paused(SITE, &[DiscoveredUrl::new("https://example.com/a")])
            .await
            .unwrap();
        assert_eq!(store.take_paused(SITE).await.unwrap().len(), 1);
        assert!(store.take_paused(SITE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_site_purges_everything() {
        let store = MemoryStore::new();
        store.record_discovered(SITE, 2).await.unwrap();
        store.complete_url(SITE, "https://example.com/a").await.unwrap();
        store
            .push_dead_letter(&DeadLetter::new(SITE, "https://example.com/b", "404"))
            .await
            .unwrap();

        store.remove_site(SITE).await.unwrap();
        assert!(store.site_status(SITE).await.unwrap().is_none());
        assert!(store.dead_letters(SITE).await.unwrap().is_empty());
        assert!(!store.is_crawled(SITE, "https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sites_sorted() {
        let store = MemoryStore::new();
        store.record_discovered("https://b.com", 1).await.unwrap();
        store.record_discovered("https://a.com", 1).await.unwrap();
        let sites = store.list_sites().await.unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].site, "https://a.com");
    }
}
