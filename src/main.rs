//! # Newsletter Pipeline
//!
//! A two-stage pipeline that mirrors a newsletter archive into a local tree
//! and republishes it to an object-storage endpoint.
//!
//! ## Features
//!
//! - Discovers every article through the paginated archive index
//! - Fetches article content, renders it to Markdown, and localizes the
//!   cover plus every inline image (bounded concurrency at both levels)
//! - Persists per-article progress so interrupted runs resume where they
//!   stopped, at both stages
//! - Uploads articles, images, and aggregate metadata files to a bucket,
//!   rewriting local image paths to their public URLs
//!
//! ## Usage
//!
//! ```sh
//! newsletter_pipeline crawl --output-dir ./crawled_data
//! newsletter_pipeline upload --base-dir ./crawled_data --endpoint http://localhost:9011
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: page through the archive index until exhausted
//! 2. **Processing**: fetch each article and its images (parallel, batched)
//! 3. **Publish**: upload the tree, rewriting image references as it goes

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod article;
mod assets;
mod cli;
mod config;
mod crawler;
mod errors;
mod fetch;
mod models;
mod oss;
mod progress;
mod publish;
mod source;
mod utils;

use cli::{Cli, Command};
use config::{CrawlerConfig, UploadConfig};
use crawler::Crawler;
use progress::ProgressLedger;
use publish::Publisher;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newsletter_pipeline starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    match args.command {
        Command::Crawl {
            output_dir,
            base_url,
            max_concurrent_articles,
            max_concurrent_images,
            batch_size,
            no_resume,
            api_delay,
            article_delay,
        } => {
            let config = CrawlerConfig {
                base_url,
                output_dir,
                max_concurrent_articles,
                max_concurrent_images,
                batch_size,
                api_delay: Duration::from_secs_f64(api_delay),
                article_delay: Duration::from_secs_f64(article_delay),
                enable_resume: !no_resume,
                ..CrawlerConfig::default()
            };
            let crawler = Crawler::new(config)?;
            match crawler.run_all().await {
                Ok(stats) => {
                    info!(
                        processed = stats.processed_articles,
                        total = stats.total_articles,
                        images = stats.total_images,
                        elapsed_s = start_time.elapsed().as_secs_f64(),
                        "Crawl finished"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Crawl aborted");
                    return Err(e.into());
                }
            }
        }
        Command::Upload {
            base_dir,
            endpoint,
            source,
            reset,
        } => {
            let config = UploadConfig {
                base_dir,
                endpoint,
                source,
                ..UploadConfig::default()
            };
            if reset {
                let mut ledger = ProgressLedger::load(config.progress_file()).await?;
                ledger.reset().await?;
                info!("Upload progress reset");
            }
            let publisher = Publisher::new(config)?;
            match publisher.publish_all().await {
                Ok(stats) => {
                    info!(
                        uploaded = stats.uploaded,
                        failed = stats.failed,
                        total = stats.total_articles,
                        bucket = %stats.bucket,
                        elapsed_s = start_time.elapsed().as_secs_f64(),
                        "Upload finished"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Upload aborted");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
