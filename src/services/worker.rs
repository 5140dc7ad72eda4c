// src/services/worker.rs

//! Job consumption and dispatch.
//!
//! The pool pulls messages from the queue and processes them under two
//! nested bounds: a global slot count, and per-site exclusivity with a
//! politeness delay between dispatches to the same site.
//!
//! A dispatch round scans ahead: messages whose site is busy or cooling
//! down are held (their lease retained) while the round keeps looking for
//! work from other sites, and are released at the end of the round. Only
//! when no other site has ready work does the pool wait out the shortest
//! cooldown.
//!
//! ```text
//! dispatch round
//!     │
//!     ├─► dequeue ──► site ready? ──► spawn job task (slot + site permit)
//!     │                   │
//!     │                   └─ busy/cooldown ──► hold, keep scanning
//!     │
//!     └─► release held messages, report what to wait for
//! ```
//!
//! Per job: pause/removal check, crawled check (the idempotence boundary
//! that makes at-least-once delivery safe), fetch + extract, index, then a
//! commit that marks the URL crawled and acks the message. Transient
//! failures are returned for redelivery until the delivery count runs out;
//! permanent ones are dead-lettered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::{DeadLetter, WorkerConfig};
use crate::queue::{JobQueue, QueueError, QueueMessage};
use crate::services::indexer::Indexer;
use crate::services::processor::{ExtractedContent, PageProcessor, ProcessError};
use crate::services::throttle::{Gate, SitePermit, SiteThrottle};
use crate::store::{JobStore, StoreError};

const DEPTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

struct Inner {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    processor: Arc<dyn PageProcessor>,
    indexer: Arc<dyn Indexer>,
    config: WorkerConfig,
    throttle: SiteThrottle,
    slots: Arc<Semaphore>,
}

impl Inner {
    fn visibility(&self) -> Duration {
        Duration::from_secs(self.config.visibility_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.config.heartbeat_interval_secs)
    }
}

/// What a dispatch round accomplished.
enum Round {
    /// Jobs were started; go straight into the next round.
    Dispatched(usize),
    /// Work exists but no site is ready; retry after this long.
    Wait(Duration),
    /// The queue had nothing for us.
    Idle,
}

/// Pool of job-processing slots over a shared queue.
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Create a pool over the given queue, store, and collaborators.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStore>,
        processor: Arc<dyn PageProcessor>,
        indexer: Arc<dyn Indexer>,
        config: WorkerConfig,
    ) -> Self {
        let throttle = SiteThrottle::new(Duration::from_millis(config.politeness_delay_ms));
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                queue,
                store,
                processor,
                indexer,
                config,
                throttle,
                slots,
            }),
        }
    }

    /// Run until cancelled, then wait for in-flight jobs to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let inner = &self.inner;
        log::info!(
            "worker pool starting ({} slots, {}ms politeness delay)",
            inner.config.max_concurrent,
            inner.config.politeness_delay_ms
        );

        let mut last_depth_log = Instant::now();
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if last_depth_log.elapsed() >= DEPTH_LOG_INTERVAL {
                last_depth_log = Instant::now();
                match inner.queue.peek_depth().await {
                    Ok(depth) => log::info!("queue depth: ~{} outstanding jobs", depth),
                    Err(e) => log::warn!("queue depth unavailable: {}", e),
                }
            }

            let wait = match self.dispatch_round().await {
                Ok(Round::Dispatched(_)) => continue,
                Ok(Round::Wait(wait)) => wait.min(inner.poll_interval()),
                Ok(Round::Idle) => inner.poll_interval(),
                Err(e) => {
                    // Transport trouble: every affected job's disposition is
                    // unknown, so claim nothing and back off.
                    log::error!("queue unavailable: {}", e);
                    inner.poll_interval()
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        // Graceful shutdown: every slot free means every job finished.
        let permits = inner.config.max_concurrent.max(1) as u32;
        let _drain = inner.slots.acquire_many(permits).await;
        log::info!("worker pool stopped");
    }

    /// Drive dispatch until the queue is empty and all in-flight jobs have
    /// finished. Used by batch runs; never returns while jobs for a paused
    /// site remain queued.
    pub async fn run_until_drained(&self) -> Result<(), QueueError> {
        loop {
            match self.dispatch_round().await? {
                Round::Dispatched(_) => {}
                Round::Wait(wait) => {
                    tokio::time::sleep(wait.min(Duration::from_millis(20))).await;
                }
                Round::Idle => {
                    let all_free = self.inner.slots.available_permits()
                        == self.inner.config.max_concurrent.max(1);
                    if all_free && self.inner.queue.peek_depth().await? == 0 {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
    }

    /// One scan over the queue: dispatch every message whose site is
    /// ready, holding the rest until the end of the round so a blocked
    /// site never starves the others.
    async fn dispatch_round(&self) -> Result<Round, QueueError> {
        let inner = &self.inner;
        let mut deferred: Vec<QueueMessage> = Vec::new();
        let mut dispatched = 0usize;
        let mut shortest_cooldown: Option<Duration> = None;
        let mut round_error = None;

        while deferred.len() < inner.config.scan_ahead.max(1) {
            let Ok(slot) = Arc::clone(&inner.slots).try_acquire_owned() else {
                break;
            };

            let message = match inner.queue.dequeue(inner.visibility()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    round_error = Some(e);
                    break;
                }
            };

            match inner.throttle.try_acquire(&message.job.site) {
                Gate::Ready(site_permit) => {
                    dispatched += 1;
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        process_message(&inner, message, site_permit).await;
                        drop(slot);
                    });
                }
                Gate::Busy => deferred.push(message),
                Gate::Cooldown(wait) => {
                    shortest_cooldown =
                        Some(shortest_cooldown.map_or(wait, |w: Duration| w.min(wait)));
                    deferred.push(message);
                }
            }
        }

        // Release the held messages before reporting.
        for message in &deferred {
            if let Err(e) = inner.queue.nack(message).await {
                log::warn!("failed to release held message {}: {}", message.id, e);
            }
        }
        if let Some(e) = round_error {
            return Err(e);
        }

        if dispatched > 0 {
            Ok(Round::Dispatched(dispatched))
        } else if let Some(wait) = shortest_cooldown {
            Ok(Round::Wait(wait))
        } else if !deferred.is_empty() {
            // Only busy sites: an in-flight completion will free one.
            Ok(Round::Wait(Duration::from_millis(50)))
        } else {
            Ok(Round::Idle)
        }
    }
}

/// Process one leased message end to end.
async fn process_message(inner: &Inner, message: QueueMessage, _site_permit: SitePermit) {
    let site = message.job.site.as_str();
    let url = message.job.url.as_str();

    // Pause and removal are checked against the live record, not the job.
    match inner.store.site_status(site).await {
        Ok(None) => {
            log::info!("dropping job for removed site {}: {}", site, url);
            ack_or_warn(inner, &message).await;
            return;
        }
        Ok(Some(status)) if status.paused => {
            // Not a failed delivery; just hand it back.
            if let Err(e) = inner.queue.nack(&message).await {
                log::warn!("failed to return paused-site job {}: {}", url, e);
            }
            return;
        }
        Ok(Some(_)) => {}
        Err(e) => {
            log::error!("store unavailable checking {}: {}; returning job", site, e);
            let _ = inner.queue.nack(&message).await;
            return;
        }
    }

    // Idempotence boundary: a duplicate delivery is acked away.
    match inner.store.is_crawled(site, url).await {
        Ok(true) => {
            log::debug!("already crawled, skipping {}", url);
            ack_or_warn(inner, &message).await;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            log::error!("store unavailable checking {}: {}; returning job", url, e);
            let _ = inner.queue.nack(&message).await;
            return;
        }
    }

    match process_with_heartbeat(inner, &message).await {
        Ok(content) => {
            // Index before committing: a job only counts once its records
            // are durable.
            if let Err(e) = inner
                .indexer
                .index(site, std::slice::from_ref(&content))
                .await
            {
                handle_transient(inner, &message, &format!("index failed: {e}")).await;
                return;
            }

            match complete_with_retry(inner, site, url).await {
                Ok(_) => {
                    ack_or_warn(inner, &message).await;
                    log::info!("completed {} ({} records)", url, content.records.len());
                }
                Err(e) => {
                    // Disposition unknown: leave the job for redelivery.
                    log::error!("failed to commit completion of {}: {}", url, e);
                    let _ = inner.queue.nack(&message).await;
                }
            }
        }
        Err(ProcessError::Transient(reason)) => handle_transient(inner, &message, &reason).await,
        Err(ProcessError::Permanent(reason)) => dead_letter(inner, &message, &reason).await,
    }
}

/// Run the processor while keeping the lease alive.
async fn process_with_heartbeat(
    inner: &Inner,
    message: &QueueMessage,
) -> Result<ExtractedContent, ProcessError> {
    let heartbeat = async {
        let mut interval = tokio::time::interval(inner.heartbeat_interval());
        interval.tick().await; // skip the immediate tick
        loop {
            interval.tick().await;
            if let Err(e) = inner.queue.extend_lease(message, inner.visibility()).await {
                log::warn!("lease extension failed for {}: {}", message.job.url, e);
            }
        }
    };

    tokio::select! {
        result = inner
            .processor
            .process(&message.job.url, message.job.content_type.as_deref()) => result,
        _ = heartbeat => unreachable!("heartbeat loop never completes"),
    }
}

async fn handle_transient(inner: &Inner, message: &QueueMessage, reason: &str) {
    if message.delivery_count >= inner.config.max_deliveries {
        dead_letter(inner, message, &format!("retries exhausted: {reason}")).await;
        return;
    }
    log::warn!(
        "transient failure for {} (delivery {}): {}",
        message.job.url,
        message.delivery_count,
        reason
    );
    if let Err(e) = inner.queue.nack(message).await {
        log::error!(
            "failed to return {} to queue: {} (lease will expire on its own)",
            message.job.url,
            e
        );
    }
}

async fn dead_letter(inner: &Inner, message: &QueueMessage, reason: &str) {
    let entry = DeadLetter::new(
        message.job.site.as_str(),
        message.job.url.as_str(),
        reason,
    );
    // A job leaves the live queue only once it is preserved somewhere an
    // operator can see.
    if let Err(e) = inner.store.push_dead_letter(&entry).await {
        log::error!(
            "failed to dead-letter {}: {}; returning to queue",
            message.job.url,
            e
        );
        let _ = inner.queue.nack(message).await;
        return;
    }
    log::warn!("dead-lettered {}: {}", message.job.url, reason);
    ack_or_warn(inner, message).await;
}

async fn complete_with_retry(inner: &Inner, site: &str, url: &str) -> Result<bool, StoreError> {
    let mut attempts = 0u32;
    loop {
        match inner.store.complete_url(site, url).await {
            Ok(done) => return Ok(done),
            Err(StoreError::Conflict(reason)) if attempts < 3 => {
                attempts += 1;
                log::debug!(
                    "store conflict committing {} (attempt {}): {}",
                    url,
                    attempts,
                    reason
                );
                tokio::time::sleep(Duration::from_millis(10 << attempts)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn ack_or_warn(inner: &Inner, message: &QueueMessage) {
    if let Err(e) = inner.queue.ack(message).await {
        log::warn!(
            "ack failed for {}: {} (job may be redelivered)",
            message.job.url,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::models::{DiscoveredUrl, SchedulerConfig};
    use crate::queue::FileQueue;
    use crate::services::indexer::IndexError;
    use crate::services::scheduler::Scheduler;
    use crate::store::MemoryStore;
    use crate::utils::get_domain;

    const SITE: &str = "https://example.com";

    #[derive(Clone, Copy)]
    enum StubOutcome {
        Success,
        Transient,
        Permanent,
    }

    /// Processor stub with scripted per-URL outcomes (defaults to success)
    /// and a per-host concurrency gauge.
    struct StubProcessor {
        outcomes: Mutex<HashMap<String, VecDeque<StubOutcome>>>,
        active: Mutex<HashMap<String, usize>>,
        overlap_detected: AtomicBool,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl StubProcessor {
        fn new(delay: Duration) -> Self {
            Self {
                outcomes: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                overlap_detected: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                delay,
            }
        }

        fn script(&self, url: &str, outcomes: &[StubOutcome]) {
            self.outcomes
                .lock()
                .unwrap()
                .insert(url.to_string(), outcomes.iter().copied().collect());
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageProcessor for StubProcessor {
        async fn process(
            &self,
            url: &str,
            _content_type: Option<&str>,
        ) -> Result<ExtractedContent, ProcessError> {
            let host = get_domain(url).unwrap_or_default();
            {
                let mut active = self.active.lock().unwrap();
                let gauge = active.entry(host.clone()).or_insert(0);
                *gauge += 1;
                if *gauge > 1 {
                    self.overlap_detected.store(true, Ordering::SeqCst);
                }
            }

            tokio::time::sleep(self.delay).await;
            self.calls.lock().unwrap().push(url.to_string());

            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(StubOutcome::Success);

            if let Some(gauge) = self.active.lock().unwrap().get_mut(&host) {
                *gauge -= 1;
            }

            match outcome {
                StubOutcome::Success => Ok(ExtractedContent {
                    url: url.to_string(),
                    content_type: Some("application/json".to_string()),
                    body: b"{}".to_vec(),
                    records: vec![json!({"@id": url, "@type": "Product"})],
                }),
                StubOutcome::Transient => Err(ProcessError::transient("connection reset")),
                StubOutcome::Permanent => Err(ProcessError::permanent("HTTP 410 Gone")),
            }
        }
    }

    /// Indexer stub that counts records and can fail a set number of times.
    #[derive(Default)]
    struct CountingIndexer {
        records: Mutex<usize>,
        failures_remaining: Mutex<usize>,
    }

    #[async_trait]
    impl Indexer for CountingIndexer {
        async fn index(&self, _site: &str, records: &[ExtractedContent]) -> Result<(), IndexError> {
            {
                let mut failures = self.failures_remaining.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(IndexError("vector store timeout".into()));
                }
            }
            *self.records.lock().unwrap() += records.iter().map(|c| c.records.len()).sum::<usize>();
            Ok(())
        }

        async fn purge_site(&self, _site: &str) -> Result<(), IndexError> {
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        queue: Arc<FileQueue>,
        store: Arc<MemoryStore>,
        processor: Arc<StubProcessor>,
        indexer: Arc<CountingIndexer>,
        scheduler: Scheduler,
        pool: WorkerPool,
    }

    async fn fixture(config: WorkerConfig) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let queue = Arc::new(FileQueue::new(tmp.path()));
        queue.provision().await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(StubProcessor::new(Duration::from_millis(2)));
        let indexer = Arc::new(CountingIndexer::default());
        let scheduler = Scheduler::new(
            queue.clone(),
            store.clone(),
            indexer.clone(),
            SchedulerConfig::default(),
        );
        let pool = WorkerPool::new(
            queue.clone(),
            store.clone(),
            processor.clone(),
            indexer.clone(),
            config,
        );
        Fixture {
            _tmp: tmp,
            queue,
            store,
            processor,
            indexer,
            scheduler,
            pool,
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            max_concurrent: 4,
            politeness_delay_ms: 0,
            visibility_timeout_secs: 60,
            max_deliveries: 5,
            poll_interval_ms: 10,
            heartbeat_interval_secs: 60,
            scan_ahead: 16,
        }
    }

    fn urls(raw: &[&str]) -> Vec<DiscoveredUrl> {
        raw.iter().map(|u| DiscoveredUrl::new(*u)).collect()
    }

    async fn drain(pool: &WorkerPool) {
        tokio::time::timeout(Duration::from_secs(30), pool.run_until_drained())
            .await
            .expect("drain timed out")
            .expect("queue error");
    }

    #[tokio::test]
    async fn test_all_urls_reach_completed() {
        let f = fixture(fast_config()).await;
        f.scheduler
            .submit_urls(
                SITE,
                urls(&[
                    "https://example.com/a.json",
                    "https://example.com/b.json",
                    "https://example.com/c.json",
                ]),
            )
            .await
            .unwrap();

        drain(&f.pool).await;

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 3);
        assert_eq!(status.crawled_urls, 3);
        assert_eq!(f.processor.call_count(), 3);
        assert_eq!(*f.indexer.records.lock().unwrap(), 3);
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered() {
        let f = fixture(fast_config()).await;
        f.processor
            .script("https://example.com/gone.json", &[StubOutcome::Permanent]);
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/gone.json"]))
            .await
            .unwrap();

        drain(&f.pool).await;

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.total_urls, 1);
        assert_eq!(status.crawled_urls, 0);

        let dead = f.store.dead_letters(SITE).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error.contains("410"));
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let f = fixture(fast_config()).await;
        f.processor.script(
            "https://example.com/flaky.json",
            &[StubOutcome::Transient, StubOutcome::Transient, StubOutcome::Success],
        );
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/flaky.json"]))
            .await
            .unwrap();

        drain(&f.pool).await;

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 1);
        assert_eq!(f.processor.call_count(), 3);
        assert!(f.store.dead_letters(SITE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let mut config = fast_config();
        config.max_deliveries = 2;
        let f = fixture(config).await;
        f.processor.script(
            "https://example.com/broken.json",
            &[StubOutcome::Transient, StubOutcome::Transient, StubOutcome::Transient],
        );
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/broken.json"]))
            .await
            .unwrap();

        drain(&f.pool).await;

        assert_eq!(f.processor.call_count(), 2);
        let dead = f.store.dead_letters(SITE).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error.contains("retries exhausted"));

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 0);
    }

    #[tokio::test]
    async fn test_index_failure_retries_whole_job() {
        let f = fixture(fast_config()).await;
        *f.indexer.failures_remaining.lock().unwrap() = 1;
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/a.json"]))
            .await
            .unwrap();

        drain(&f.pool).await;

        // Processed twice: once for the failed index pass, once to completion.
        assert_eq!(f.processor.call_count(), 2);
        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 1);
        assert_eq!(*f.indexer.records.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_paused_site_is_never_processed() {
        let f = fixture(fast_config()).await;
        f.scheduler
            .submit_urls(
                SITE,
                urls(&[
                    "https://example.com/1.json",
                    "https://example.com/2.json",
                    "https://example.com/3.json",
                    "https://example.com/4.json",
                    "https://example.com/5.json",
                ]),
            )
            .await
            .unwrap();
        assert!(f.scheduler.toggle_pause(SITE).await.unwrap());

        let shutdown = CancellationToken::new();
        let pool = WorkerPool {
            inner: Arc::clone(&f.pool.inner),
        };
        let runner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { pool.run(shutdown).await }
        });

        // Give the pool time to churn: queued jobs must bounce, not run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.processor.call_count(), 0);
        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 0);

        // Resume and wait for all five to finish.
        assert!(!f.scheduler.toggle_pause(SITE).await.unwrap());
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = f.store.site_status(SITE).await.unwrap().unwrap();
            if status.crawled_urls == 5 {
                break;
            }
            assert!(Instant::now() < deadline, "crawl did not finish in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown.cancel();
        runner.await.unwrap();
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_crashed_consumer_job_is_redelivered() {
        let f = fixture(fast_config()).await;
        f.scheduler
            .submit_urls(SITE, urls(&["https://example.com/a.json"]))
            .await
            .unwrap();

        // Simulate a worker that dequeued and died: lease taken, never acked.
        let abandoned = f
            .queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(abandoned.delivery_count, 1);

        drain(&f.pool).await;

        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 1);
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_two_jobs_for_same_site_overlap() {
        let mut config = fast_config();
        config.politeness_delay_ms = 3;
        let f = fixture(config).await;

        let mut all = Vec::new();
        for i in 0..5 {
            all.push(format!("https://example.com/{i}.json"));
            all.push(format!("https://other.com/{i}.json"));
        }
        let candidates: Vec<DiscoveredUrl> = all.iter().map(|u| DiscoveredUrl::new(u.clone())).collect();
        for candidate in candidates {
            let site = if candidate.url.contains("other") {
                "https://other.com"
            } else {
                SITE
            };
            f.scheduler.submit_urls(site, vec![candidate]).await.unwrap();
        }

        drain(&f.pool).await;

        assert!(!f.processor.overlap_detected.load(Ordering::SeqCst));
        assert_eq!(
            f.store.site_status(SITE).await.unwrap().unwrap().crawled_urls,
            5
        );
        assert_eq!(
            f.store
                .site_status("https://other.com")
                .await
                .unwrap()
                .unwrap()
                .crawled_urls,
            5
        );
    }

    #[tokio::test]
    async fn test_jobs_for_removed_site_drain_without_processing() {
        let f = fixture(fast_config()).await;
        f.scheduler
            .submit_urls(
                SITE,
                urls(&["https://example.com/a.json", "https://example.com/b.json"]),
            )
            .await
            .unwrap();
        f.scheduler.remove_site(SITE).await.unwrap();

        drain(&f.pool).await;

        assert_eq!(f.processor.call_count(), 0);
        assert!(f.store.site_status(SITE).await.unwrap().is_none());
        assert_eq!(f.queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acked_away() {
        let f = fixture(fast_config()).await;
        f.store.record_discovered(SITE, 1).await.unwrap();
        f.store
            .complete_url(SITE, "https://example.com/a.json")
            .await
            .unwrap();

        // A duplicate job for an already-crawled URL sneaks into the queue.
        f.queue
            .enqueue(&crate::models::Job::new(SITE, "https://example.com/a.json"))
            .await
            .unwrap();

        drain(&f.pool).await;

        assert_eq!(f.processor.call_count(), 0);
        let status = f.store.site_status(SITE).await.unwrap().unwrap();
        assert_eq!(status.crawled_urls, 1);
    }
}
