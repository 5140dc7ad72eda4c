// src/services/mod.rs

//! Core services: scheduling, dispatch, processing, indexing.

pub mod indexer;
pub mod processor;
pub mod scheduler;
pub mod throttle;
pub mod worker;

pub use indexer::{IndexError, Indexer, JsonlIndexer};
pub use processor::{ExtractedContent, PageProcessor, ProcessError, SchemaProcessor};
pub use scheduler::{Scheduler, SubmitOutcome};
pub use throttle::{Gate, SitePermit, SiteThrottle};
pub use worker::WorkerPool;
