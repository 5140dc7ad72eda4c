// src/queue/mod.rs

//! Job queue transports.
//!
//! Every transport implements the same lease-based contract: a dequeued
//! message is hidden from other consumers for a visibility timeout and
//! becomes redeliverable when the lease expires without an ack. A worker
//! that dies mid-job therefore needs no heartbeat machinery for its jobs
//! to be recovered.
//!
//! Three variants are available, selected by configuration at startup:
//!
//! - [`FileQueue`]: durable local files, claims via atomic rename
//! - `SqsQueue` (feature `sqs`): managed broker with native visibility
//! - `S3Queue` (feature `s3`): object storage with companion lease objects

pub mod file;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(feature = "sqs")]
pub mod sqs;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Job, QueueBackend, QueueConfig};

pub use file::FileQueue;
#[cfg(feature = "s3")]
pub use s3::S3Queue;
#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

/// Queue transport error.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Transport unreachable after configured retries. Callers must treat
    /// the affected job's disposition as unknown.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// A message could not be serialized or deserialized.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A lease operation (ack/nack/extend) failed.
    #[error("lease error: {0}")]
    Lease(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Malformed(e.to_string())
    }
}

/// Wire-level envelope around a [`Job`].
///
/// Carries the backend-specific lease handle plus approximate delivery
/// metadata. A message never outlives the backend that produced it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Backend message identifier
    pub id: String,

    /// The logical payload
    pub job: Job,

    /// Backend-specific lease handle (file path, SQS receipt, S3 lease key)
    pub receipt: String,

    /// Approximate number of times this message has been delivered
    /// (1 on first delivery)
    pub delivery_count: u32,

    /// Approximate enqueue time, where the backend reports one
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Lease-based job queue contract, implemented identically by every
/// transport variant.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Ensure the backend's resources exist and are reachable.
    async fn provision(&self) -> Result<(), QueueError>;

    /// Append a job.
    ///
    /// Enqueuing the same `job_id` twice is safe: the duplicate is either
    /// rejected or harmlessly redundant.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Return at most one message not currently leased elsewhere, leased
    /// for `visibility_timeout`. Non-blocking when empty; callers poll.
    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Permanently remove the message. Acking twice is a no-op.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Release the lease early, making the message immediately
    /// redeliverable.
    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Push the lease deadline out by `additional`, for jobs that outlive
    /// their original visibility timeout.
    async fn extend_lease(
        &self,
        message: &QueueMessage,
        additional: Duration,
    ) -> Result<(), QueueError>;

    /// Approximate count of outstanding messages, for status reporting.
    async fn peek_depth(&self) -> Result<usize, QueueError>;
}

/// Build the configured queue transport.
pub async fn from_config(config: &QueueConfig) -> Result<Arc<dyn JobQueue>, QueueError> {
    match config.backend {
        QueueBackend::File => Ok(Arc::new(FileQueue::new(&config.dir))),

        #[cfg(feature = "sqs")]
        QueueBackend::Sqs => {
            let queue_url = config
                .queue_url
                .clone()
                .ok_or_else(|| QueueError::Unavailable("queue.queue_url not set".into()))?;
            Ok(Arc::new(SqsQueue::from_env(queue_url).await))
        }

        #[cfg(feature = "s3")]
        QueueBackend::S3 => {
            let bucket = config
                .bucket
                .clone()
                .ok_or_else(|| QueueError::Unavailable("queue.bucket not set".into()))?;
            Ok(Arc::new(
                S3Queue::from_env(bucket, config.prefix.clone()).await,
            ))
        }

        #[cfg(not(feature = "sqs"))]
        QueueBackend::Sqs => Err(QueueError::Unavailable(
            "built without the 'sqs' feature".into(),
        )),

        #[cfg(not(feature = "s3"))]
        QueueBackend::S3 => Err(QueueError::Unavailable(
            "built without the 's3' feature".into(),
        )),
    }
}
