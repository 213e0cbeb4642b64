//! Crawl orchestrator: discovery, batching, bounded fan-out, resumability.
//!
//! Discovered references are partitioned into fixed-size batches purely for
//! checkpoint/log granularity; resume works at per-article granularity
//! through the progress ledger. Within a batch, articles run concurrently
//! under the article-level bound while each article fans its asset downloads
//! out under its own bound — two independent concurrency domains.
//!
//! The orchestrator's stream loop is the single writer of the crawl ledger:
//! workers hand their outcome back through the stream and the loop records
//! it (flushing after every unit), so a terminated run resumes cleanly.
//!
//! Per reference: `Discovered → (skip if done) → Fetching → Processed | Failed`.
//! A failed reference is retried on the next run; a completed one never is.

use crate::article::{ArticleProcessor, ProcessOutcome};
use crate::config::CrawlerConfig;
use crate::errors::Result;
use crate::models::{ArticleMetadata, ArticleSummary, CrawlStats, RecommendationRecord};
use crate::progress::ProgressLedger;
use crate::source::NewsletterSource;
use crate::utils::ensure_writable_dir;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, instrument, warn};

/// Runs the full ingest stage for one newsletter source.
pub struct Crawler {
    config: Arc<CrawlerConfig>,
    processor: ArticleProcessor,
    source: NewsletterSource,
}

impl Crawler {
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        let processor = ArticleProcessor::new(client.clone(), Arc::clone(&config));
        let source = NewsletterSource::new(client, Arc::clone(&config));
        Ok(Self {
            config,
            processor,
            source,
        })
    }

    /// Discover every article reference, then process them batch by batch.
    ///
    /// Unit failures are recorded and the run continues; only a corrupt
    /// ledger, a failed discovery, or local I/O trouble abort the stage.
    #[instrument(level = "info", skip_all)]
    pub async fn run_all(&self) -> Result<CrawlStats> {
        ensure_writable_dir(&self.config.articles_dir()).await?;
        ensure_writable_dir(&self.config.data_dir()).await?;

        let mut ledger = ProgressLedger::load(self.config.progress_file()).await?;

        let summaries = self.source.discover_all().await?;
        let total_articles = summaries.len();
        fs::write(
            self.config.data_dir().join("articles_metadata.json"),
            serde_json::to_string_pretty(&summaries)?,
        )
        .await?;

        let mut processed: Vec<ArticleMetadata> = Vec::new();
        let mut recommendations: Vec<RecommendationRecord> = Vec::new();
        let mut total_images = 0usize;
        let mut skipped = 0usize;

        let batch_size = self.config.batch_size.max(1);
        let total_batches = total_articles.div_ceil(batch_size);

        for (batch_index, batch) in summaries.chunks(batch_size).enumerate() {
            info!(
                batch = batch_index + 1,
                total_batches,
                size = batch.len(),
                "Processing batch"
            );

            let pending: Vec<(String, &ArticleSummary)> = batch
                .iter()
                .filter_map(|summary| match summary.article_id() {
                    Some(id) => Some((id, summary)),
                    None => {
                        warn!("Archive entry without id or slug; skipping");
                        None
                    }
                })
                .filter(|(id, _)| {
                    if self.config.enable_resume && ledger.is_done(id) {
                        skipped += 1;
                        false
                    } else {
                        true
                    }
                })
                .collect();

            // Workers run concurrently; outcomes funnel back into this loop,
            // the ledger's single writer.
            let mut outcomes = stream::iter(pending)
                .map(|(id, summary)| {
                    let processor = self.processor.clone();
                    async move {
                        let result = processor.process(summary, &id).await;
                        (id, result)
                    }
                })
                .buffer_unordered(self.config.max_concurrent_articles.max(1));

            while let Some((id, result)) = outcomes.next().await {
                match result {
                    Ok(ProcessOutcome {
                        article,
                        recommendation,
                        images_fetched,
                    }) => {
                        total_images += images_fetched;
                        processed.push(article);
                        recommendations.push(recommendation);
                        ledger.mark_done(&id).await?;
                    }
                    Err(e) => {
                        error!(id = %id, error = %e, "Article failed; continuing with the rest");
                        ledger.mark_failed(&id, &e.to_string()).await?;
                    }
                }
            }

            info!(
                batch = batch_index + 1,
                processed = processed.len(),
                "Batch complete"
            );
        }

        fs::write(
            self.config.data_dir().join("processed_articles.json"),
            serde_json::to_string_pretty(&processed)?,
        )
        .await?;
        fs::write(
            self.config.data_dir().join("recommendation_data.json"),
            serde_json::to_string_pretty(&recommendations)?,
        )
        .await?;
        ledger
            .add_counter("images_downloaded", total_images as u64)
            .await?;

        let stats = CrawlStats {
            total_articles,
            processed_articles: processed.len(),
            total_images,
            output_directory: self.config.output_dir.clone(),
        };

        info!(
            total = stats.total_articles,
            processed = stats.processed_articles,
            completed_overall = ledger.completed_count(),
            skipped,
            images = stats.total_images,
            images_overall = ledger.counter("images_downloaded"),
            failed = ledger.failed().len(),
            output = %stats.output_directory.display(),
            "Crawl complete"
        );
        for (id, reason) in ledger.failed() {
            warn!(id = %id, reason = %reason, "Article failed this run");
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, output_dir: PathBuf) -> CrawlerConfig {
        CrawlerConfig {
            base_url,
            output_dir,
            page_size: 50,
            api_delay: Duration::from_millis(1),
            article_delay: Duration::from_millis(1),
            max_retries: 0,
            batch_size: 2,
            max_concurrent_articles: 3,
            ..CrawlerConfig::default()
        }
    }

    async fn mount_archive(server: &MockServer, entries: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(entries))
            .mount(server)
            .await;
    }

    fn post_body(title: &str) -> serde_json::Value {
        serde_json::json!({ "title": title, "body_html": format!("<p>{title}</p>") })
    }

    #[tokio::test]
    async fn test_run_all_processes_and_records_progress() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            serde_json::json!([
                {"id": 1, "slug": "a", "title": "A"},
                {"id": 2, "slug": "b", "title": "B"},
                {"id": 3, "slug": "c", "title": "C"}
            ]),
        )
        .await;
        for slug in ["a", "b", "c"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/v1/posts/{slug}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(post_body(slug)))
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let crawler =
            Crawler::new(test_config(server.uri(), dir.path().to_path_buf())).unwrap();
        let stats = crawler.run_all().await.unwrap();

        assert_eq!(stats.total_articles, 3);
        assert_eq!(stats.processed_articles, 3);
        assert!(dir.path().join("articles/1/content.md").exists());
        assert!(dir.path().join("data/processed_articles.json").exists());
        assert!(dir.path().join("data/recommendation_data.json").exists());

        let ledger = ProgressLedger::load(dir.path().join("crawl_progress.json"))
            .await
            .unwrap();
        assert!(ledger.is_done("1") && ledger.is_done("2") && ledger.is_done("3"));
    }

    #[tokio::test]
    async fn test_run_all_resume_skips_completed_articles() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            serde_json::json!([
                {"id": 1, "slug": "a", "title": "A"},
                {"id": 2, "slug": "b", "title": "B"}
            ]),
        )
        .await;
        // Only article "b" is fetchable; "a" must be skipped via the ledger,
        // so its post endpoint is never hit.
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/a"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(post_body("b")))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ProgressLedger::load(dir.path().join("crawl_progress.json"))
            .await
            .unwrap();
        ledger.mark_done("1").await.unwrap();
        drop(ledger);

        let crawler =
            Crawler::new(test_config(server.uri(), dir.path().to_path_buf())).unwrap();
        let stats = crawler.run_all().await.unwrap();
        assert_eq!(stats.processed_articles, 1);
    }

    #[tokio::test]
    async fn test_run_all_isolates_article_failures() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            serde_json::json!([
                {"id": 1, "slug": "good", "title": "Good"},
                {"id": 2, "slug": "bad", "title": "Bad"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(post_body("good")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/bad"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler =
            Crawler::new(test_config(server.uri(), dir.path().to_path_buf())).unwrap();
        let stats = crawler.run_all().await.unwrap();

        assert_eq!(stats.total_articles, 2);
        assert_eq!(stats.processed_articles, 1);

        let ledger = ProgressLedger::load(dir.path().join("crawl_progress.json"))
            .await
            .unwrap();
        assert!(ledger.is_done("1"));
        assert!(!ledger.is_done("2"));
        assert!(ledger.failed().contains_key("2"));
    }

    #[tokio::test]
    async fn test_run_all_respects_article_concurrency_bound() {
        let server = MockServer::start().await;
        mount_archive(
            &server,
            serde_json::json!([
                {"id": 1, "slug": "a", "title": "A"},
                {"id": 2, "slug": "b", "title": "B"},
                {"id": 3, "slug": "c", "title": "C"},
                {"id": 4, "slug": "d", "title": "D"}
            ]),
        )
        .await;
        for slug in ["a", "b", "c", "d"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/v1/posts/{slug}")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(post_body(slug))
                        .set_delay(Duration::from_millis(100)),
                )
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            batch_size: 4,
            max_concurrent_articles: 2,
            ..test_config(server.uri(), dir.path().to_path_buf())
        };
        let crawler = Crawler::new(config).unwrap();

        // 4 article fetches of 100ms each under a bound of 2 need two waves,
        // so anything under ~200ms would mean more than 2 ran at once.
        let t0 = std::time::Instant::now();
        let stats = crawler.run_all().await.unwrap();
        assert_eq!(stats.processed_articles, 4);
        assert!(t0.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_fatal() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crawl_progress.json"), "{broken").unwrap();

        let crawler =
            Crawler::new(test_config(server.uri(), dir.path().to_path_buf())).unwrap();
        let err = crawler.run_all().await.unwrap_err();
        assert!(err.is_stage_fatal());
    }
}
