// src/queue/s3.rs

//! AWS S3 queue implementation.
//!
//! S3 has no message primitive, so the queue is simulated with two key
//! families:
//!
//! ```text
//! {prefix}/pending/{job_id}.json   # the job payload
//! {prefix}/leases/{job_id}.json    # lease record: token, deadline, count
//! ```
//!
//! A consumer claims a job by writing a lease record with a fresh token and
//! reading it back: if the read returns its own token it owns the lease.
//! S3 offers no compare-and-swap, so two consumers racing on the same key
//! can briefly both believe they won; the worker-side crawled check absorbs
//! that duplicate, consistent with at-least-once delivery.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Job;
use crate::queue::{JobQueue, QueueError, QueueMessage};

/// Lease record stored next to a pending job.
#[derive(Debug, Serialize, Deserialize)]
struct Lease {
    token: String,
    expires_at: DateTime<Utc>,
    delivery_count: u32,
}

/// S3-backed queue.
pub struct S3Queue {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Queue {
    /// Create a new S3 queue instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create an S3 queue from the ambient AWS environment.
    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket, prefix)
    }

    fn pending_key(&self, job_id: &str) -> String {
        format!("{}/pending/{}.json", self.prefix.trim_end_matches('/'), job_id)
    }

    fn lease_key(&self, job_id: &str) -> String {
        format!("{}/leases/{}.json", self.prefix.trim_end_matches('/'), job_id)
    }

    fn claim_token() -> String {
        format!(
            "{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }

    /// Read a JSON object, returning None on NoSuchKey.
    async fn read_json<T: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<Option<T>, QueueError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                Ok(Some(serde_json::from_slice(&bytes.into_bytes())?))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(QueueError::Unavailable(service_err.to_string()))
                }
            }
        }
    }

    /// Write a JSON object.
    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), QueueError> {
        let json = serde_json::to_vec(value)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), QueueError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// List pending job ids (first page; approximate is fine for callers).
    async fn list_pending(&self) -> Result<Vec<String>, QueueError> {
        let pending_prefix = format!("{}/pending/", self.prefix.trim_end_matches('/'));
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&pending_prefix)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let mut ids = Vec::new();
        for object in resp.contents() {
            if let Some(key) = object.key() {
                if let Some(name) = key.strip_prefix(&pending_prefix) {
                    if let Some(id) = name.strip_suffix(".json") {
                        ids.push(id.to_string());
                    }
                }
            }
        }
        Ok(ids)
    }

    fn split_receipt(receipt: &str) -> Result<(&str, &str), QueueError> {
        receipt
            .split_once(':')
            .ok_or_else(|| QueueError::Lease(format!("malformed receipt '{receipt}'")))
    }
}

#[async_trait]
impl JobQueue for S3Queue {
    async fn provision(&self) -> Result<(), QueueError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(format!("bucket not reachable: {e}")))?;
        Ok(())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        // Same job id means same payload, so the overwrite is harmless.
        self.write_json(&self.pending_key(&job.job_id), job).await
    }

    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let now = Utc::now();
        let lease_duration = chrono::Duration::from_std(visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        for job_id in self.list_pending().await? {
            let lease_key = self.lease_key(&job_id);

            let previous: Option<Lease> = self.read_json(&lease_key).await?;
            if let Some(lease) = &previous {
                if lease.expires_at > now {
                    continue;
                }
            }

            let lease = Lease {
                token: Self::claim_token(),
                expires_at: now + lease_duration,
                delivery_count: previous.map(|l| l.delivery_count).unwrap_or(0) + 1,
            };
            self.write_json(&lease_key, &lease).await?;

            // Read back to detect a lost race: last writer wins the claim.
            let confirmed: Option<Lease> = self.read_json(&lease_key).await?;
            let owned = confirmed
                .map(|l| l.token == lease.token)
                .unwrap_or(false);
            if !owned {
                continue;
            }

            // The pending object may have been acked between listing and now.
            let Some(job) = self.read_json::<Job>(&self.pending_key(&job_id)).await? else {
                let _ = self.delete_object(&lease_key).await;
                continue;
            };

            return Ok(Some(QueueMessage {
                id: job_id.clone(),
                receipt: format!("{}:{}", job_id, lease.token),
                delivery_count: lease.delivery_count,
                enqueued_at: Some(job.enqueued_at),
                job,
            }));
        }

        Ok(None)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let (job_id, _token) = Self::split_receipt(&message.receipt)?;
        self.delete_object(&self.pending_key(job_id)).await?;
        self.delete_object(&self.lease_key(job_id)).await?;
        Ok(())
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let (job_id, token) = Self::split_receipt(&message.receipt)?;
        let lease_key = self.lease_key(job_id);

        // Only the lease owner may release early; an expired deadline keeps
        // the delivery count for the next claimant.
        let Some(mut lease) = self.read_json::<Lease>(&lease_key).await? else {
            return Ok(());
        };
        if lease.token != token {
            return Ok(());
        }
        lease.expires_at = Utc::now();
        self.write_json(&lease_key, &lease).await
    }

    async fn extend_lease(
        &self,
        message: &QueueMessage,
        additional: Duration,
    ) -> Result<(), QueueError> {
        let (job_id, token) = Self::split_receipt(&message.receipt)?;
        let lease_key = self.lease_key(job_id);

        let Some(mut lease) = self.read_json::<Lease>(&lease_key).await? else {
            return Err(QueueError::Lease("lease no longer exists".into()));
        };
        if lease.token != token {
            return Err(QueueError::Lease("lease owned by another consumer".into()));
        }

        let extension =
            chrono::Duration::from_std(additional).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let base = lease.expires_at.max(Utc::now());
        lease.expires_at = base + extension;
        self.write_json(&lease_key, &lease).await
    }

    async fn peek_depth(&self) -> Result<usize, QueueError> {
        Ok(self.list_pending().await?.len())
    }
}
