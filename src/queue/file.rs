// src/queue/file.rs

//! Local filesystem queue implementation.
//!
//! Intended for development and single-host deployments. Jobs are stored
//! one file each under the queue directory; claiming is an atomic rename,
//! so concurrent consumers on the same filesystem never receive the same
//! message while its lease is live.
//!
//! ## Queue Layout
//!
//! ```text
//! {dir}/
//! ├── job-{id}.json               # pending job
//! └── job-{id}.json.processing    # leased job (lease deadline inside)
//! ```
//!
//! A leased file whose deadline has passed is renamed back to its pending
//! name by the next dequeue scan, which is what makes a crashed worker's
//! jobs redeliverable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::models::Job;
use crate::queue::{JobQueue, QueueError, QueueMessage};

const PENDING_PREFIX: &str = "job-";
const PENDING_SUFFIX: &str = ".json";
const PROCESSING_SUFFIX: &str = ".json.processing";

/// On-disk envelope around a job.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    job: Job,
    delivery_count: u32,
    #[serde(default)]
    lease_expires_at: Option<DateTime<Utc>>,
}

/// File-based queue backend.
#[derive(Clone)]
pub struct FileQueue {
    dir: PathBuf,
}

impl FileQueue {
    /// Create a queue rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pending_path(&self, job_id: &str) -> PathBuf {
        self.dir
            .join(format!("{PENDING_PREFIX}{job_id}{PENDING_SUFFIX}"))
    }

    fn processing_path(&self, job_id: &str) -> PathBuf {
        self.dir
            .join(format!("{PENDING_PREFIX}{job_id}{PROCESSING_SUFFIX}"))
    }

    /// Write an envelope atomically (write to temp, then rename).
    async fn write_envelope(&self, path: &Path, envelope: &Envelope) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec_pretty(envelope)?;
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    async fn read_envelope(&self, path: &Path) -> Result<Envelope, QueueError> {
        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// List queue directory entries once, split into pending and leased.
    async fn scan(&self) -> Result<(Vec<String>, Vec<String>), QueueError> {
        let mut pending = Vec::new();
        let mut leased = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(PENDING_PREFIX) {
                continue;
            }
            if name.ends_with(PROCESSING_SUFFIX) {
                leased.push(name);
            } else if name.ends_with(PENDING_SUFFIX) {
                pending.push(name);
            }
        }
        pending.sort();
        leased.sort();
        Ok((pending, leased))
    }

    /// Return expired leases to the pending pool.
    async fn reclaim_expired(&self, leased: &[String]) {
        let now = Utc::now();
        for name in leased {
            let path = self.dir.join(name);
            let envelope = match self.read_envelope(&path).await {
                Ok(envelope) => envelope,
                // Concurrent consumer may have acked it between scan and read.
                Err(_) => continue,
            };
            let expired = envelope
                .lease_expires_at
                .map(|deadline| deadline <= now)
                .unwrap_or(true);
            if expired {
                let pending = self.pending_path(&envelope.job.job_id);
                if tokio::fs::rename(&path, &pending).await.is_ok() {
                    log::debug!(
                        "reclaimed expired lease for job {} ({})",
                        envelope.job.job_id,
                        envelope.job.url
                    );
                }
            }
        }
    }
}

fn io_err(e: std::io::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

#[async_trait]
impl JobQueue for FileQueue {
    async fn provision(&self) -> Result<(), QueueError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let pending = self.pending_path(&job.job_id);
        let processing = self.processing_path(&job.job_id);

        // Duplicate enqueue is a no-op: the job is already pending or leased.
        if tokio::fs::try_exists(&pending).await.map_err(io_err)?
            || tokio::fs::try_exists(&processing).await.map_err(io_err)?
        {
            return Ok(());
        }

        let envelope = Envelope {
            job: job.clone(),
            delivery_count: 0,
            lease_expires_at: None,
        };
        self.write_envelope(&pending, &envelope).await
    }

    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let (_, leased) = self.scan().await?;
        self.reclaim_expired(&leased).await;

        // List again so a just-reclaimed job is claimable in this call.
        let (pending, _) = self.scan().await?;
        for name in pending {
            let pending_path = self.dir.join(&name);
            let processing_path = self.dir.join(format!("{name}.processing"));

            // Atomic claim: losing the rename race just moves on.
            if tokio::fs::rename(&pending_path, &processing_path)
                .await
                .is_err()
            {
                continue;
            }

            let mut envelope = match self.read_envelope(&processing_path).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    // Quarantine unparsable files so the scan does not loop on them.
                    let bad = processing_path.with_extension("bad");
                    let _ = tokio::fs::rename(&processing_path, &bad).await;
                    log::error!("quarantined corrupt queue file {}: {}", name, e);
                    continue;
                }
            };

            envelope.delivery_count += 1;
            envelope.lease_expires_at = Some(
                Utc::now()
                    + chrono::Duration::from_std(visibility_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            );
            self.write_envelope(&processing_path, &envelope).await?;

            return Ok(Some(QueueMessage {
                id: envelope.job.job_id.clone(),
                receipt: processing_path.to_string_lossy().to_string(),
                delivery_count: envelope.delivery_count,
                enqueued_at: Some(envelope.job.enqueued_at),
                job: envelope.job,
            }));
        }

        Ok(None)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        match tokio::fs::remove_file(&message.receipt).await {
            Ok(()) => Ok(()),
            // Second ack, or reclaimed in the meantime.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Lease(e.to_string())),
        }
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let pending = self.pending_path(&message.job.job_id);
        match tokio::fs::rename(&message.receipt, &pending).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Lease(e.to_string())),
        }
    }

    async fn extend_lease(
        &self,
        message: &QueueMessage,
        additional: Duration,
    ) -> Result<(), QueueError> {
        let path = PathBuf::from(&message.receipt);
        let mut envelope = self
            .read_envelope(&path)
            .await
            .map_err(|e| QueueError::Lease(format!("lease not held: {e}")))?;

        let extension =
            chrono::Duration::from_std(additional).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let base = envelope
            .lease_expires_at
            .filter(|deadline| *deadline > Utc::now())
            .unwrap_or_else(Utc::now);
        envelope.lease_expires_at = Some(base + extension);
        self.write_envelope(&path, &envelope).await
    }

    async fn peek_depth(&self) -> Result<usize, QueueError> {
        let (pending, leased) = self.scan().await?;
        Ok(pending.len() + leased.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_job(url: &str) -> Job {
        Job::new("https://example.com", url)
    }

    async fn make_queue() -> (TempDir, FileQueue) {
        let tmp = TempDir::new().unwrap();
        let queue = FileQueue::new(tmp.path());
        queue.provision().await.unwrap();
        (tmp, queue)
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_ack() {
        let (_tmp, queue) = make_queue().await;
        let job = make_job("https://example.com/a.json");
        queue.enqueue(&job).await.unwrap();

        let msg = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(msg.job, job);
        assert_eq!(msg.delivery_count, 1);

        queue.ack(&msg).await.unwrap();
        assert!(queue.dequeue(Duration::from_secs(60)).await.unwrap().is_none());
        assert_eq!(queue.peek_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let (_tmp, queue) = make_queue().await;
        let job = make_job("https://example.com/a.json");
        queue.enqueue(&job).await.unwrap();
        queue.enqueue(&job).await.unwrap();
        assert_eq!(queue.peek_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_leased_message_is_hidden() {
        let (_tmp, queue) = make_queue().await;
        queue.enqueue(&make_job("https://example.com/a.json")).await.unwrap();

        let _msg = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("message");
        // Still counted as outstanding, but not deliverable.
        assert_eq!(queue.peek_depth().await.unwrap(), 1);
        assert!(queue.dequeue(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_makes_message_redeliverable() {
        let (_tmp, queue) = make_queue().await;
        queue.enqueue(&make_job("https://example.com/a.json")).await.unwrap();

        let msg = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("message");
        queue.nack(&msg).await.unwrap();

        let again = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("redelivered");
        assert_eq!(again.job.job_id, msg.job.job_id);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let (_tmp, queue) = make_queue().await;
        queue.enqueue(&make_job("https://example.com/a.json")).await.unwrap();

        // Zero-length lease expires immediately.
        let msg = queue
            .dequeue(Duration::from_secs(0))
            .await
            .unwrap()
            .expect("message");

        let again = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("redelivered after lease expiry");
        assert_eq!(again.job.job_id, msg.job.job_id);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_extend_lease_keeps_message_hidden() {
        let (_tmp, queue) = make_queue().await;
        queue.enqueue(&make_job("https://example.com/a.json")).await.unwrap();

        let msg = queue
            .dequeue(Duration::from_secs(0))
            .await
            .unwrap()
            .expect("message");
        queue
            .extend_lease(&msg, Duration::from_secs(120))
            .await
            .unwrap();

        // The extension replaced the already-expired deadline.
        assert!(queue.dequeue(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_ack_is_noop() {
        let (_tmp, queue) = make_queue().await;
        queue.enqueue(&make_job("https://example.com/a.json")).await.unwrap();
        let msg = queue
            .dequeue(Duration::from_secs(60))
            .await
            .unwrap()
            .expect("message");
        queue.ack(&msg).await.unwrap();
        queue.ack(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_order_and_depth() {
        let (_tmp, queue) = make_queue().await;
        for i in 0..3 {
            queue
                .enqueue(&make_job(&format!("https://example.com/{i}.json")))
                .await
                .unwrap();
        }
        assert_eq!(queue.peek_depth().await.unwrap(), 3);

        let mut seen = Vec::new();
        while let Some(msg) = queue.dequeue(Duration::from_secs(60)).await.unwrap() {
            seen.push(msg.job.url.clone());
            queue.ack(&msg).await.unwrap();
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(queue.peek_depth().await.unwrap(), 0);
    }
}
