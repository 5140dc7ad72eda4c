// src/models/mod.rs

//! Domain models for the crawler application.

mod config;
mod job;
mod site;

// Re-export all public types
pub use config::{
    Config, HttpConfig, IndexerConfig, QueueBackend, QueueConfig, SchedulerConfig, StoreConfig,
    WorkerConfig,
};
pub use job::{DeadLetter, DiscoveredUrl, Job};
pub use site::SiteStatus;
