//! Pipeline entry points for crawler operations.
//!
//! - `run_submit`: Discover schema files for a site and schedule them
//! - `run_workers`: Consume and process queued jobs
//!
//! The builders wire the configured queue transport, store, processor,
//! and indexer together for the CLI.

pub mod submit;
pub mod work;

use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::queue::{self, JobQueue};
use crate::services::{Indexer, JsonlIndexer, Scheduler, SchemaProcessor, WorkerPool};
use crate::store::{FileStore, JobStore};

pub use submit::run_submit;
pub use work::run_workers;

async fn build_queue(config: &Config) -> Result<Arc<dyn JobQueue>> {
    let queue = queue::from_config(&config.queue).await?;
    queue.provision().await?;
    Ok(queue)
}

fn build_store(config: &Config) -> Arc<dyn JobStore> {
    Arc::new(FileStore::new(&config.store.dir))
}

fn build_indexer(config: &Config) -> Arc<dyn Indexer> {
    Arc::new(JsonlIndexer::new(&config.indexer.path))
}

/// Build a scheduler over the configured components.
pub async fn build_scheduler(config: &Config) -> Result<Scheduler> {
    Ok(Scheduler::new(
        build_queue(config).await?,
        build_store(config),
        build_indexer(config),
        config.scheduler.clone(),
    ))
}

/// Build a worker pool over the configured components.
pub async fn build_worker_pool(config: &Config) -> Result<WorkerPool> {
    Ok(WorkerPool::new(
        build_queue(config).await?,
        build_store(config),
        Arc::new(SchemaProcessor::new(&config.http)),
        build_indexer(config),
        config.worker.clone(),
    ))
}
