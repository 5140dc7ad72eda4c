//! siterake CLI
//!
//! Submission, worker, and status entry points. The queue backend and all
//! tuning knobs come from the config file plus environment overrides.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use siterake::{error::Result, models::Config, pipeline};

/// siterake - distributed schema.org crawler
#[derive(Parser, Debug)]
#[command(name = "siterake", version, about = "Distributed schema.org crawler")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a site: discover its schema files and queue them
    Submit {
        /// Site URL (or a schema_map.xml URL)
        site: String,

        /// Explicit file URLs to queue, skipping discovery
        urls: Vec<String>,
    },

    /// Run the worker pool
    Work {
        /// Exit once the queue is drained instead of running until Ctrl-C
        #[arg(long)]
        drain: bool,
    },

    /// Pause or resume dispatch for a site
    Pause {
        /// Site URL
        site: String,
    },

    /// Remove a site and purge its records and indexed data
    Remove {
        /// Site URL
        site: String,
    },

    /// Show crawl status
    Status {
        /// Site URL (omit to list all sites)
        site: Option<String>,
    },

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    config.validate()?;

    match cli.command {
        Command::Submit { site, urls } => {
            let scheduler = pipeline::build_scheduler(&config).await?;
            let outcome = pipeline::run_submit(&config, &scheduler, &site, urls).await?;
            log::info!(
                "{}: {} queued, {} skipped, {} withheld (paused)",
                site,
                outcome.admitted - outcome.buffered,
                outcome.skipped,
                outcome.buffered
            );
        }

        Command::Work { drain } => {
            let pool = pipeline::build_worker_pool(&config).await?;
            pipeline::run_workers(&pool, drain).await?;
        }

        Command::Pause { site } => {
            let scheduler = pipeline::build_scheduler(&config).await?;
            let paused = scheduler.toggle_pause(&site).await?;
            log::info!("{}: {}", site, if paused { "paused" } else { "resumed" });
        }

        Command::Remove { site } => {
            let scheduler = pipeline::build_scheduler(&config).await?;
            scheduler.remove_site(&site).await?;
        }

        Command::Status { site } => {
            let scheduler = pipeline::build_scheduler(&config).await?;
            match site {
                Some(site) => match scheduler.get_status(&site).await? {
                    Some(status) => {
                        log::info!(
                            "{}: {}/{} crawled{}",
                            status.site,
                            status.crawled_urls,
                            status.total_urls,
                            if status.paused { " [paused]" } else { "" }
                        );
                        log::info!("last updated: {}", status.last_updated);
                        for dead in scheduler.dead_letters(&site).await? {
                            log::warn!(
                                "dead-lettered: {} ({}) at {}",
                                dead.url,
                                dead.error,
                                dead.timestamp
                            );
                        }
                    }
                    None => log::warn!("unknown site: {}", site),
                },
                None => {
                    let sites = scheduler.list_sites().await?;
                    if sites.is_empty() {
                        log::info!("no sites submitted yet");
                    }
                    for status in sites {
                        log::info!(
                            "{}: {}/{} crawled{}",
                            status.site,
                            status.crawled_urls,
                            status.total_urls,
                            if status.paused { " [paused]" } else { "" }
                        );
                    }
                    log::info!(
                        "queue depth: ~{} outstanding jobs",
                        scheduler.queue_depth().await?
                    );
                }
            }
        }

        Command::Validate => {
            log::info!("Configuration OK ({:?} backend)", config.queue.backend);
        }
    }

    Ok(())
}
