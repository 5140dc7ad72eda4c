// src/store/file.rs

//! Durable file-backed job store.
//!
//! One directory per site keyed by a digest of the site name, with the
//! status record, the append-only crawl log, and the paused buffer as
//! separate files. Mutations for a site are serialized by a per-site async
//! mutex, and every file replacement is a write-to-temp plus rename so a
//! crash never leaves a half-written record.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── deadletter.jsonl
//! └── sites/{digest}/
//!     ├── status.json        # SiteStatus
//!     ├── crawled.jsonl      # one crawled URL per line
//!     └── pending.json       # URLs withheld while paused
//! ```
//!
//! Admitted markers are process-local: losing them on restart can only
//! produce a duplicate job, which the crawled check absorbs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::{DeadLetter, DiscoveredUrl, SiteStatus};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Default)]
struct SiteCache {
    loaded: bool,
    status: Option<SiteStatus>,
    admitted: HashSet<String>,
    crawled: HashSet<String>,
    paused_buffer: Vec<DiscoveredUrl>,
}

/// File-backed store rooted at a directory.
pub struct FileStore {
    root: PathBuf,
    sites: Mutex<HashMap<String, Arc<Mutex<SiteCache>>>>,
    dead_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sites: Mutex::new(HashMap::new()),
            dead_lock: Mutex::new(()),
        }
    }

    fn site_dir(&self, site: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(site.as_bytes()));
        self.root.join("sites").join(digest)
    }

    fn dead_letter_path(&self) -> PathBuf {
        self.root.join("deadletter.jsonl")
    }

    async fn handle(&self, site: &str) -> Arc<Mutex<SiteCache>> {
        let mut sites = self.sites.lock().await;
        sites
            .entry(site.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SiteCache::default())))
            .clone()
    }

    /// Populate the cache from disk on first access.
    async fn load(&self, site: &str, cache: &mut SiteCache) -> Result<(), StoreError> {
        if cache.loaded {
            return Ok(());
        }
        let dir = self.site_dir(site);

        cache.status = match tokio::fs::read(dir.join("status.json")).await {
            Ok(bytes) => Some(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match tokio::fs::read_to_string(dir.join("crawled.jsonl")).await {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    let url: String = serde_json::from_str(line)?;
                    cache.crawled.insert(url);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::read(dir.join("pending.json")).await {
            Ok(bytes) => cache.paused_buffer = serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        cache.loaded = true;
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn persist_status(&self, site: &str, status: &SiteStatus) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(status)?;
        Self::write_atomic(&self.site_dir(site).join("status.json"), &bytes).await
    }

    async fn persist_buffer(&self, site: &str, buffer: &[DiscoveredUrl]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(buffer)?;
        Self::write_atomic(&self.site_dir(site).join("pending.json"), &bytes).await
    }

    async fn append_line(path: &Path, line: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn record_discovered(&self, site: &str, count: u64) -> Result<(), StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;

        let status = cache
            .status
            .get_or_insert_with(|| SiteStatus::new(site));
        status.total_urls += count;
        status.last_updated = Utc::now();
        let status = status.clone();
        self.persist_status(site, &status).await
    }

    async fn site_status(&self, site: &str) -> Result<Option<SiteStatus>, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        Ok(cache.status.clone())
    }

    async fn list_sites(&self) -> Result<Vec<SiteStatus>, StoreError> {
        let sites_dir = self.root.join("sites");
        let mut statuses = Vec::new();

        let mut entries = match tokio::fs::read_dir(&sites_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(statuses),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            match tokio::fs::read(entry.path().join("status.json")).await {
                Ok(bytes) => statuses.push(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        statuses.sort_by(|a: &SiteStatus, b: &SiteStatus| a.site.cmp(&b.site));
        Ok(statuses)
    }

    async fn toggle_paused(&self, site: &str) -> Result<bool, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;

        let status = cache
            .status
            .get_or_insert_with(|| SiteStatus::new(site));
        status.paused = !status.paused;
        status.last_updated = Utc::now();
        let (paused, status) = (status.paused, status.clone());
        self.persist_status(site, &status).await?;
        Ok(paused)
    }

    async fn admit_url(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        if cache.crawled.contains(url) {
            return Ok(false);
        }
        Ok(cache.admitted.insert(url.to_string()))
    }

    async fn revoke_url(&self, site: &str, url: &str) -> Result<(), StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        cache.admitted.remove(url);
        Ok(())
    }

    async fn is_crawled(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        Ok(cache.crawled.contains(url))
    }

    async fn complete_url(&self, site: &str, url: &str) -> Result<bool, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        let cache = &mut *cache;

        // Completion against a removed site is a no-op.
        let Some(status) = cache.status.as_mut() else {
            return Ok(false);
        };
        if !cache.crawled.insert(url.to_string()) {
            return Ok(false);
        }
        status.crawled_urls += 1;
        status.last_updated = Utc::now();
        let status = status.clone();

        Self::append_line(
            &self.site_dir(site).join("crawled.jsonl"),
            &serde_json::to_string(url)?,
        )
        .await?;
        self.persist_status(site, &status).await?;
        Ok(true)
    }

    async fn buffer_paused(&self, site: &str, urls: &[DiscoveredUrl]) -> Result<(), StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        cache.paused_buffer.extend(urls.iter().cloned());
        let buffer = cache.paused_buffer.clone();
        self.persist_buffer(site, &buffer).await
    }

    async fn take_paused(&self, site: &str) -> Result<Vec<DiscoveredUrl>, StoreError> {
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        self.load(site, &mut cache).await?;
        let drained = std::mem::take(&mut cache.paused_buffer);
        if !drained.is_empty() {
            self.persist_buffer(site, &[]).await?;
        }
        Ok(drained)
    }

    async fn push_dead_letter(&self, entry: &DeadLetter) -> Result<(), StoreError> {
        let _guard = self.dead_lock.lock().await;
        Self::append_line(&self.dead_letter_path(), &serde_json::to_string(entry)?).await
    }

    async fn dead_letters(&self, site: &str) -> Result<Vec<DeadLetter>, StoreError> {
        let _guard = self.dead_lock.lock().await;
        let text = match tokio::fs::read_to_string(self.dead_letter_path()).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let entry: DeadLetter = serde_json::from_str(line)?;
            if entry.site == site {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn remove_site(&self, site: &str) -> Result<(), StoreError> {
        // Take the per-site lock so an in-flight completion finishes first.
        let handle = self.handle(site).await;
        let mut cache = handle.lock().await;
        *cache = SiteCache {
            loaded: true,
            ..SiteCache::default()
        };

        match tokio::fs::remove_dir_all(self.site_dir(site)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Rewrite the dead-letter log without this site's entries.
        let _guard = self.dead_lock.lock().await;
        let path = self.dead_letter_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let kept: Vec<&str> = text
            .lines()
            .filter(|line| {
                serde_json::from_str::<DeadLetter>(line)
                    .map(|entry| entry.site != site)
                    .unwrap_or(false)
            })
            .collect();
        let mut rewritten = kept.join("\n");
        if !rewritten.is_empty() {
            rewritten.push('\n');
        }
        Self::write_atomic(&path, rewritten.as_bytes()).await
    }
}
