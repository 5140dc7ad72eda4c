// src/pipeline/work.rs

//! Worker pipeline.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::services::WorkerPool;

/// Run the worker pool.
///
/// In drain mode the pool exits once the queue is empty and every
/// in-flight job has finished; otherwise it runs until Ctrl-C and then
/// shuts down gracefully.
pub async fn run_workers(pool: &WorkerPool, drain: bool) -> Result<()> {
    if drain {
        pool.run_until_drained().await?;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown requested, finishing in-flight jobs");
            trigger.cancel();
        }
    });

    pool.run(shutdown).await;
    Ok(())
}
