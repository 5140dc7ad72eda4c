// src/services/indexer.rs

//! Structured record indexing.
//!
//! The worker pool hands extracted records to an [`Indexer`] after each
//! successful fetch. The default [`JsonlIndexer`] appends one JSONL entry
//! per record to a local log file; embedding generation and real vector
//! stores plug in behind the same trait.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::services::processor::ExtractedContent;

/// Indexing failure. Always treated as transient: the job is retried
/// rather than marked crawled with records missing from the index.
#[derive(Debug, Error)]
#[error("index error: {0}")]
pub struct IndexError(pub String);

/// External collaborator that persists extracted records.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Persist the records extracted from one or more pages of a site.
    async fn index(&self, site: &str, records: &[ExtractedContent]) -> Result<(), IndexError>;

    /// Remove everything indexed for a site.
    async fn purge_site(&self, site: &str) -> Result<(), IndexError>;
}

/// One line of the index log.
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    timestamp: DateTime<Utc>,
    site: String,
    id: Option<String>,
    record: Value,
}

/// Append-only JSONL indexer.
pub struct JsonlIndexer {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlIndexer {
    /// Create an indexer writing to the given log file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read all entries back (test and inspection helper).
    pub async fn entries_for(&self, site: &str) -> Result<Vec<Value>, IndexError> {
        let _guard = self.lock.lock().await;
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IndexError(e.to_string())),
        };
        let mut records = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let entry: IndexEntry =
                serde_json::from_str(line).map_err(|e| IndexError(e.to_string()))?;
            if entry.site == site {
                records.push(entry.record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Indexer for JsonlIndexer {
    async fn index(&self, site: &str, records: &[ExtractedContent]) -> Result<(), IndexError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexError(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| IndexError(e.to_string()))?;

        let mut written = 0usize;
        for content in records {
            for record in &content.records {
                let entry = IndexEntry {
                    timestamp: Utc::now(),
                    site: site.to_string(),
                    id: record
                        .get("@id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    record: record.clone(),
                };
                let line = serde_json::to_string(&entry).map_err(|e| IndexError(e.to_string()))?;
                file.write_all(line.as_bytes())
                    .await
                    .map_err(|e| IndexError(e.to_string()))?;
                file.write_all(b"\n")
                    .await
                    .map_err(|e| IndexError(e.to_string()))?;
                written += 1;
            }
        }
        file.flush().await.map_err(|e| IndexError(e.to_string()))?;

        if written > 0 {
            log::info!("indexed {} records for {}", written, site);
        }
        Ok(())
    }

    async fn purge_site(&self, site: &str) -> Result<(), IndexError> {
        let _guard = self.lock.lock().await;

        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError(e.to_string())),
        };

        let kept: Vec<&str> = text
            .lines()
            .filter(|line| {
                serde_json::from_str::<IndexEntry>(line)
                    .map(|entry| entry.site != site)
                    .unwrap_or(false)
            })
            .collect();
        let mut rewritten = kept.join("\n");
        if !rewritten.is_empty() {
            rewritten.push('\n');
        }

        // Write-to-temp plus rename keeps the log whole if we crash here.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, rewritten.as_bytes())
            .await
            .map_err(|e| IndexError(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| IndexError(e.to_string()))?;

        log::info!("purged index entries for {}", site);
        Ok(())
    }
}
