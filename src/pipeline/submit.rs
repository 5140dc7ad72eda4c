// src/pipeline/submit.rs

//! Site submission pipeline.

use crate::discovery;
use crate::error::Result;
use crate::models::{Config, DiscoveredUrl};
use crate::services::{Scheduler, SubmitOutcome};
use crate::utils::http::create_async_client;

/// Submit a site for crawling.
///
/// With explicit URLs, they are scheduled directly. Without, discovery
/// resolves the site's schema maps into a URL list first.
pub async fn run_submit(
    config: &Config,
    scheduler: &Scheduler,
    site: &str,
    urls: Vec<String>,
) -> Result<SubmitOutcome> {
    let candidates: Vec<DiscoveredUrl> = if urls.is_empty() {
        log::info!("discovering schema files for {}", site);
        let client = create_async_client(&config.http)?;
        discovery::discover_site(&client, site).await?
    } else {
        urls.into_iter().map(DiscoveredUrl::new).collect()
    };

    if candidates.is_empty() {
        log::warn!("{}: nothing to schedule", site);
        return Ok(SubmitOutcome::default());
    }

    scheduler.submit_urls(site, candidates).await
}
