//! Command-line interface definitions.
//!
//! Two subcommands mirror the two pipeline stages: `crawl` ingests articles
//! from the remote newsletter source into a local output tree, and `upload`
//! republishes a crawled tree to the object-storage endpoint.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the newsletter pipeline.
///
/// # Examples
///
/// ```sh
/// # Crawl the default source into ./crawled_data
/// newsletter_pipeline crawl
///
/// # Fresh crawl ignoring previous progress, with a wider article fan-out
/// newsletter_pipeline crawl --no-resume --max-concurrent-articles 10
///
/// # Publish a crawled tree to a local object-storage endpoint
/// newsletter_pipeline upload --base-dir ./crawled_data --endpoint http://localhost:9011
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the newsletter source into a local output tree
    Crawl {
        /// Directory the crawled tree is written to
        #[arg(short, long, default_value = "crawled_data")]
        output_dir: PathBuf,

        /// Base URL of the newsletter source
        #[arg(long, default_value = "https://nlp.elvissaravia.com")]
        base_url: String,

        /// How many articles are processed concurrently
        #[arg(long, default_value_t = 5)]
        max_concurrent_articles: usize,

        /// How many images are downloaded concurrently per article
        #[arg(long, default_value_t = 20)]
        max_concurrent_images: usize,

        /// Articles per checkpoint batch
        #[arg(long, default_value_t = 10)]
        batch_size: usize,

        /// Ignore previous progress and re-process every article
        #[arg(long)]
        no_resume: bool,

        /// Seconds to wait between archive index pages
        #[arg(long, default_value_t = 1.0)]
        api_delay: f64,

        /// Seconds to wait after each processed article
        #[arg(long, default_value_t = 0.5)]
        article_delay: f64,
    },
    /// Upload a crawled tree to the object-storage endpoint
    Upload {
        /// Root of the crawled tree produced by `crawl`
        #[arg(short, long, default_value = "crawled_data")]
        base_dir: PathBuf,

        /// Object-storage endpoint
        #[arg(long, default_value = "http://localhost:9011")]
        endpoint: String,

        /// Source label the bucket name is derived from
        #[arg(long, default_value = "nlp-newsletter")]
        source: String,

        /// Clear previous upload progress before starting
        #[arg(long)]
        reset: bool,
    },
}
