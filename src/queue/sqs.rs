// src/queue/sqs.rs

//! AWS SQS queue implementation.
//!
//! The broker provides the lease model natively: `dequeue` maps to
//! `ReceiveMessage` with a visibility timeout, `nack` resets visibility to
//! zero, and `extend_lease` bumps the remaining visibility.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use chrono::{TimeZone, Utc};

use crate::models::Job;
use crate::queue::{JobQueue, QueueError, QueueMessage};

/// SQS-backed queue.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Create a new SQS queue client.
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Create an SQS queue from the ambient AWS environment.
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), queue_url)
    }

    async fn queue_attribute(&self, name: QueueAttributeName) -> Result<usize, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(name.clone())
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(format!("SQS attribute query failed: {e}")))?;

        Ok(resp
            .attributes()
            .and_then(|attrs| attrs.get(&name))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn provision(&self) -> Result<(), QueueError> {
        // The queue itself is managed infrastructure; verify reachability.
        self.queue_attribute(QueueAttributeName::ApproximateNumberOfMessages)
            .await
            .map(|_| ())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let body = serde_json::to_string(job)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(format!("SQS send failed: {e}")))?;
        Ok(())
    }

    async fn dequeue(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(1)
            .visibility_timeout(visibility_timeout.as_secs().min(i32::MAX as u64) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(format!("SQS receive failed: {e}")))?;

        let Some(msg) = resp.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let receipt = msg
            .receipt_handle()
            .ok_or_else(|| QueueError::Malformed("missing receipt handle".into()))?
            .to_string();
        let job: Job = serde_json::from_str(msg.body().unwrap_or_default())?;

        // SentTimestamp is epoch millis.
        let enqueued_at = msg
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        let delivery_count = msg
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|c| c.parse::<u32>().ok())
            .unwrap_or(1);

        Ok(Some(QueueMessage {
            id: msg.message_id().unwrap_or(&job.job_id).to_string(),
            job,
            receipt,
            delivery_count,
            enqueued_at,
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .send()
            .await
            .map_err(|e| QueueError::Lease(format!("SQS delete failed: {e}")))?;
        Ok(())
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Lease(format!("SQS visibility change failed: {e}")))?;
        Ok(())
    }

    async fn extend_lease(
        &self,
        message: &QueueMessage,
        additional: Duration,
    ) -> Result<(), QueueError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .visibility_timeout(additional.as_secs().min(i32::MAX as u64) as i32)
            .send()
            .await
            .map_err(|e| QueueError::Lease(format!("SQS visibility change failed: {e}")))?;
        Ok(())
    }

    async fn peek_depth(&self) -> Result<usize, QueueError> {
        let visible = self
            .queue_attribute(QueueAttributeName::ApproximateNumberOfMessages)
            .await?;
        let in_flight = self
            .queue_attribute(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .await?;
        Ok(visible + in_flight)
    }
}
