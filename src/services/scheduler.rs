// src/services/scheduler.rs

//! Turns discovered URLs into queued jobs.
//!
//! The scheduler is the front-end's entry into the core: it admits each
//! (site, url) pair at most once, keeps `total_urls` honest across
//! resubmissions, withholds jobs for paused sites, and purges everything
//! when a site is removed.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{DiscoveredUrl, Job, SchedulerConfig, SiteStatus};
use crate::queue::{JobQueue, QueueError};
use crate::services::indexer::Indexer;
use crate::store::JobStore;

/// What a submission did, for logging and API responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubmitOutcome {
    /// URLs newly admitted (queued or buffered)
    pub admitted: usize,
    /// URLs skipped as already crawled or already admitted
    pub skipped: usize,
    /// Of the admitted URLs, how many were withheld because the site is
    /// paused
    pub buffered: usize,
}

/// Job scheduler.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    indexer: Arc<dyn Indexer>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler over the given queue, store, and indexer.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStore>,
        indexer: Arc<dyn Indexer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            indexer,
            config,
        }
    }

    /// Admit discovered URLs for a site.
    ///
    /// Each not-yet-crawled, not-yet-admitted URL becomes exactly one job.
    /// Resubmitting the same list is idempotent: duplicates are skipped
    /// silently and `total_urls` does not inflate. While the site is
    /// paused, discovery is still recorded but jobs are withheld until
    /// resume.
    pub async fn submit_urls(
        &self,
        site: &str,
        urls: Vec<DiscoveredUrl>,
    ) -> Result<SubmitOutcome> {
        // Create the site record before reading the pause flag.
        self.store.record_discovered(site, 0).await?;
        let paused = self
            .store
            .site_status(site)
            .await?
            .map(|status| status.paused)
            .unwrap_or(false);

        let mut outcome = SubmitOutcome::default();
        let mut withheld = Vec::new();

        for candidate in urls {
            if self.store.is_crawled(site, &candidate.url).await? {
                outcome.skipped += 1;
                continue;
            }
            if !self.store.admit_url(site, &candidate.url).await? {
                outcome.skipped += 1;
                continue;
            }

            if paused {
                withheld.push(candidate);
                outcome.admitted += 1;
                continue;
            }

            let job = candidate.into_job(site);
            if let Err(e) = self.enqueue_with_retry(&job).await {
                // Give the URL back so a later submission can retry it;
                // already-admitted jobs stay valid.
                self.store.revoke_url(site, &job.url).await?;
                self.store
                    .record_discovered(site, outcome.admitted as u64)
                    .await?;
                return Err(e.into());
            }
            outcome.admitted += 1;
        }

        if !withheld.is_empty() {
            outcome.buffered = withheld.len();
            self.store.buffer_paused(site, &withheld).await?;
        }
        self.store
            .record_discovered(site, outcome.admitted as u64)
            .await?;

        log::info!(
            "{}: admitted {} URLs ({} skipped, {} withheld while paused)",
            site,
            outcome.admitted,
            outcome.skipped,
            outcome.buffered
        );
        Ok(outcome)
    }

    /// Flip the pause flag for a site.
    ///
    /// On the transition to unpaused, URLs withheld during the paused
    /// interval are flushed into the queue. Returns the new flag value.
    pub async fn toggle_pause(&self, site: &str) -> Result<bool> {
        let paused = self.store.toggle_paused(site).await?;
        if paused {
            log::info!("{}: paused", site);
            return Ok(true);
        }

        let withheld = self.store.take_paused(site).await?;
        let total = withheld.len();
        for (index, candidate) in withheld.iter().enumerate() {
            let job = candidate.clone().into_job(site);
            if let Err(e) = self.enqueue_with_retry(&job).await {
                // Re-buffer the unflushed tail so no URL is lost.
                self.store.buffer_paused(site, &withheld[index..]).await?;
                return Err(e.into());
            }
        }

        if total > 0 {
            log::info!("{}: resumed, flushed {} withheld URLs", site, total);
        } else {
            log::info!("{}: resumed", site);
        }
        Ok(false)
    }

    /// Remove a site entirely.
    ///
    /// Deletes the status record, crawl records, buffered URLs and dead
    /// letters, and purges the site from the index. Jobs still in the
    /// queue drain naturally: workers see the missing site record and ack
    /// without processing.
    pub async fn remove_site(&self, site: &str) -> Result<()> {
        self.store.remove_site(site).await?;
        self.indexer.purge_site(site).await?;
        log::info!("{}: removed", site);
        Ok(())
    }

    /// Current status for one site.
    pub async fn get_status(&self, site: &str) -> Result<Option<SiteStatus>> {
        Ok(self.store.site_status(site).await?)
    }

    /// Status of every known site.
    pub async fn list_sites(&self) -> Result<Vec<SiteStatus>> {
        Ok(self.store.list_sites().await?)
    }

    /// Approximate number of outstanding jobs across all sites.
    pub async fn queue_depth(&self) -> Result<usize> {
        Ok(self.queue.peek_depth().await?)
    }

    /// Dead-lettered jobs recorded for a site.
    pub async fn dead_letters(&self, site: &str) -> Result<Vec<crate::models::DeadLetter>> {
        Ok(self.store.dead_letters(site).await?)
    }

    async fn enqueue_with_retry(&self, job: &Job) -> std::result::Result<(), QueueError> {
        let mut attempt = 0u32;
        loop {
            match self.queue.enqueue(job).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.enqueue_retries.max(1) {
                        return Err(e);
                    }
                    let backoff = Duration::from_millis(
                        self.config.enqueue_backoff_ms << (attempt - 1).min(8),
                    );
                    log::warn!(
                        "enqueue of {} failed (attempt {}): {}; retrying in {:?}",
                        job.url,
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::queue::FileQueue;
    use crate::services::indexer::IndexError;
    use crate::services::processor::ExtractedContent;
    use crate::store::MemoryStore;

    const SITE: &str = "https://example.com";

    /// Indexer stub that records purged sites.
    #[derive(Default)]
    struct RecordingIndexer {
        purged: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Indexer for RecordingIndexer {
        async fn index(&self, _site: &str, _records: &[ExtractedContent]) -> std::result::Result<(), IndexError> {
            Ok(())
        }

        async fn purge_site(&self, site: &str) -> std::result::Result<(), IndexError> {
            self.purged.lock().unwrap().push(site.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        queue: Arc<FileQueue>,
        store: Arc<MemoryStore>,
        indexer: Arc<RecordingIndexer>,
        scheduler: Scheduler,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(FileQueue::new(tmp.path()));
        queue.provision().await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(RecordingIndexer::default());
        let scheduler = Scheduler::new(
            queue.clone(),
            store.clone(),
            indexer.clone(),
            SchedulerConfig::default(),
        );
        Fixture {
            _tmp: tmp,
            queue,
            store,
            indexer,
            scheduler,
        }
    }

    fn urls(raw: &[&str]) -> Vec<DiscoveredUrl> {
        raw.iter().map(|u| DiscoveredUrl::new(*u)).collect()
    }

    #[tokio::test]
    async fn test_submit_enqueues_each_url_once() {
        let f = fixture().await;
        let outcome = f
            .scheduler
            .submit_urls(SITE, urls(&["https://example.com/a", "https://example.com/b"]))
            .await
            .unwrap();

        assert_eq!(outcome.admitted, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(f.queue.peek_depth().await.unwrap(), 2);

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 2);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture().await;
        let list = urls(&["https://example.com/a", "https://example.com/b"]);
        f.scheduler.submit_urls(SITE, list.clone()).await.unwrap();
        let outcome = f.scheduler.submit_urls(SITE, list).await.unwrap();

        assert_eq!(outcome.admitted, 0);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(f.queue.peek_depth().await.unwrap(), 2);

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 2);
    }

    #[tokio::test]
    async fn test_crawled_urls_are_skipped() {
        let f = fixture().await;
        f.store.record_discovered(SITE, 1).await.unwrap();
        f.store
            .complete_url(SITE, "https://example.com/a")
            .await
            .unwrap();

        let outcome = f
            .scheduler
            .submit_urls(SITE, urls(&["https://example.com/a"]))
            .await
            .unwrap();
        assert_eq!(outcome.admitted, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 1);
        assert_eq!(status.crawled_urls, 1);
    }

    #[tokio::test]
    async fn test_paused_site_buffers_and_resume_flushes() {
        let f = fixture().await;
        assert!(f.scheduler.toggle_pause(SITE).await.unwrap());

        let outcome = f
            .scheduler
            .submit_urls(SITE, urls(&["https://example.com/a", "https://example.com/b"]))
            .await
            .unwrap();
        assert_eq!(outcome.admitted, 2);
        assert_eq!(outcome.buffered, 2);
        // Discovery is recorded, but nothing is enqueued while paused.
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 2);

        assert!(!f.scheduler.toggle_pause(SITE).await.unwrap());
        assert_eq!(f.queue.peek_depth().await.unwrap(), 2);
        assert!(f.store.take_paused(SITE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_site_purges_store_and_index() {
        let f = fixture().await;
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/a"]))
            .await
            .unwrap();

        f.scheduler.remove_site(SITE).await.unwrap();
        assert!(f.scheduler.get_status(SITE).await.unwrap().is_none());
        assert_eq!(*f.indexer.purged.lock().unwrap(), vec![SITE.to_string()]);
    }

    #[tokio::test]
    async fn test_list_sites_reports_all() {
        let f = fixture().await;
        f.scheduler
            .submit_urls("https://a.com", urls(&["https://a.com/1"]))
            .await
            .unwrap();
        f.scheduler
            .submit_urls("https://b.com", urls(&["https://b.com/1"]))
            .await
            .unwrap();

        let sites = f.scheduler.list_sites().await.unwrap();
        assert_eq!(sites.len(), 2);
    }
}
