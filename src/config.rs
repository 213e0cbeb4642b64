//! Static configuration structs for the crawl and upload stages.
//!
//! These are plain pass-through values: the CLI fills them in and the
//! orchestrator and publisher read them at start. Defaults mirror the
//! values the pipeline was tuned against.

use std::path::PathBuf;
use std::time::Duration;

/// Options consumed by the crawl stage.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Base URL of the newsletter, e.g. `https://nlp.elvissaravia.com`.
    pub base_url: String,
    /// Path of the paginated archive index endpoint.
    pub api_path: String,
    /// Root of the local output tree.
    pub output_dir: PathBuf,
    /// Page size used when paginating the archive index.
    pub page_size: usize,
    /// Politeness delay between archive index requests.
    pub api_delay: Duration,
    /// Delay applied after each processed article.
    pub article_delay: Duration,
    /// Per-request timeout for all remote fetches.
    pub request_timeout: Duration,
    /// Retry budget for transient fetch failures.
    pub max_retries: usize,
    /// Batch size; shapes checkpoint/log granularity only.
    pub batch_size: usize,
    /// Outer bound: articles processed concurrently.
    pub max_concurrent_articles: usize,
    /// Inner bound: image downloads concurrent per article.
    pub max_concurrent_images: usize,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Skip articles the ledger already marks completed.
    pub enable_resume: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nlp.elvissaravia.com".to_string(),
            api_path: "/api/v1/archive".to_string(),
            output_dir: PathBuf::from("crawled_data"),
            page_size: 50,
            api_delay: Duration::from_secs(1),
            article_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            batch_size: 10,
            max_concurrent_articles: 5,
            max_concurrent_images: 20,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
            enable_resume: true,
        }
    }
}

impl CrawlerConfig {
    /// Absolute URL of the archive index endpoint.
    pub fn archive_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.api_path)
    }

    /// Absolute URL of the per-article content endpoint.
    pub fn post_url(&self, slug: &str) -> String {
        format!(
            "{}/api/v1/posts/{}",
            self.base_url.trim_end_matches('/'),
            slug
        )
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.output_dir.join("articles")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.output_dir.join("data")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.output_dir.join("crawl_progress.json")
    }
}

/// Options consumed by the publish stage.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root of the local tree produced by the crawl stage.
    pub base_dir: PathBuf,
    /// Object-storage endpoint, e.g. `http://localhost:9011`.
    pub endpoint: String,
    /// Source label the bucket name is derived from.
    pub source: String,
    /// Delay between article uploads.
    pub article_delay: Duration,
    /// Per-request timeout for uploads.
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("crawled_data"),
            endpoint: "http://localhost:9011".to_string(),
            source: "nlp-newsletter".to_string(),
            article_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UploadConfig {
    pub fn articles_dir(&self) -> PathBuf {
        self.base_dir.join("articles")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.base_dir.join("oss_upload_progress.json")
    }
}
