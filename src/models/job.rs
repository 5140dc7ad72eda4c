// src/models/job.rs

//! Job and dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::job_key;

/// One unit of work: a single URL to fetch and process for a site.
///
/// The `job_id` is derived from `(site, url)`, so enqueuing the same URL
/// twice produces the same id and backends can treat the second enqueue as
/// a harmless duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique token identifying this job
    pub job_id: String,

    /// Site the URL belongs to
    pub site: String,

    /// URL to fetch
    pub url: String,

    /// Content type hint from discovery, if any
    #[serde(default)]
    pub content_type: Option<String>,

    /// When the job was created
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job for a (site, url) pair.
    pub fn new(site: impl Into<String>, url: impl Into<String>) -> Self {
        let site = site.into();
        let url = url.into();
        Self {
            job_id: job_key(&site, &url),
            site,
            url,
            content_type: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Attach a content type hint.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A candidate URL produced by discovery, with an optional content type
/// hint carried through to the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Build the job for this candidate.
    pub fn into_job(self, site: &str) -> Job {
        let mut job = Job::new(site, self.url);
        job.content_type = self.content_type;
        job
    }
}

impl From<&str> for DiscoveredUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for DiscoveredUrl {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// A job that permanently failed, preserved for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub site: String,
    pub url: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(site: impl Into<String>, url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            url: url.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}
