//! Article processor: fetch one article, localize its media, emit records.
//!
//! For each discovered reference the processor fetches the full content
//! payload, renders the body to markdown, downloads the cover plus every
//! inline image under the per-article concurrency bound, then rewrites the
//! references of *successfully fetched* assets — remote URL to local
//! `images/{name}` — consistently across the content body and the metadata
//! fields naming the same logical asset. Assets that failed to download keep
//! their remote URL, so the article's success is independent of individual
//! asset success. Rewriting to public URLs happens later, in the publisher.
//!
//! Output per article:
//!
//! ```text
//! <output_dir>/articles/<id>/content.md
//! <output_dir>/articles/<id>/metadata.json
//! <output_dir>/articles/<id>/images/*
//! ```

use crate::config::CrawlerConfig;
use crate::errors::Result;
use crate::models::{ArticleMetadata, ArticleSummary, CoverImage, RecommendationRecord};
use crate::source::{html_to_markdown, NewsletterSource};
use crate::assets;
use itertools::Itertools;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// The two sibling records produced for every processed article.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Full archival record, persisted to `metadata.json`.
    pub article: ArticleMetadata,
    /// Slim record for downstream recommendation consumers.
    pub recommendation: RecommendationRecord,
    /// Number of assets localized for this article.
    pub images_fetched: usize,
}

/// Processes single articles; cheap to clone across concurrent workers.
#[derive(Debug, Clone)]
pub struct ArticleProcessor {
    client: Client,
    config: Arc<CrawlerConfig>,
    source: NewsletterSource,
}

impl ArticleProcessor {
    pub fn new(client: Client, config: Arc<CrawlerConfig>) -> Self {
        let source = NewsletterSource::new(client.clone(), Arc::clone(&config));
        Self {
            client,
            config,
            source,
        }
    }

    /// Process one article end to end.
    ///
    /// Fails as a unit on content-fetch or local-write errors; individual
    /// asset failures are absorbed (the record reflects the successfully
    /// fetched subset only).
    #[instrument(level = "info", skip_all, fields(%id))]
    pub async fn process(&self, summary: &ArticleSummary, id: &str) -> Result<ProcessOutcome> {
        let content_ref = NewsletterSource::content_ref(summary)?;
        let post = self.source.fetch_post(&content_ref).await?;

        let (mut content, inline_images) =
            html_to_markdown(post.body_html.as_deref().unwrap_or_default());

        // Cover first, then inline images, deduplicated while keeping order.
        let cover_url = summary
            .cover_image
            .as_ref()
            .or(post.cover_image.as_ref())
            .and_then(|c| c.resolve())
            .map(str::to_string);
        let image_urls: Vec<String> = cover_url
            .iter()
            .cloned()
            .chain(inline_images.iter().cloned())
            .filter_map(|u| self.resolve_image_url(&u))
            .unique()
            .collect();

        let article_dir = self.config.articles_dir().join(id);
        let images_dir = article_dir.join("images");
        fs::create_dir_all(&images_dir).await?;

        let outcomes = assets::fetch_all(
            &self.client,
            &image_urls,
            &images_dir,
            self.config.max_concurrent_images,
            self.config.max_retries,
            self.config.article_delay,
        )
        .await;

        // Remote URL -> local spelling, successes only.
        let mut local_by_url: HashMap<String, String> = HashMap::new();
        let mut local_images: Vec<String> = Vec::new();
        for (url, result) in &outcomes {
            if let Ok(asset) = result {
                let local = format!("images/{}", assets::local_image_name(url));
                debug!(
                    path = %asset.path.display(),
                    bytes = asset.bytes,
                    extension = %asset.extension,
                    "Localized asset"
                );
                local_by_url.insert(url.clone(), local.clone());
                local_images.push(local);
            }
        }
        let images_fetched = local_images.len();
        if images_fetched < image_urls.len() {
            warn!(
                id,
                fetched = images_fetched,
                requested = image_urls.len(),
                "Some assets failed to download; their references stay remote"
            );
        }

        for (remote, local) in &local_by_url {
            content = content.replace(remote, local);
        }

        let content_images: Vec<String> = inline_images
            .iter()
            .filter_map(|u| self.resolve_image_url(u))
            .unique()
            .map(|u| local_by_url.get(&u).cloned().unwrap_or(u))
            .collect();

        let cover_image = cover_url.as_ref().map(|u| {
            CoverImage::Direct(local_by_url.get(u).cloned().unwrap_or_else(|| u.clone()))
        });

        let title = post
            .title
            .clone()
            .or_else(|| summary.title.clone())
            .unwrap_or_else(|| id.to_string());

        // Unknown remote fields from both endpoints, content payload winning.
        let mut extra = summary.extra.clone();
        extra.extend(post.extra.clone());

        let article = ArticleMetadata {
            id: id.to_string(),
            title: title.clone(),
            post_date: post.post_date.clone().or_else(|| summary.post_date.clone()),
            cover_image: cover_image.clone(),
            content_images,
            local_images,
            description: post
                .description
                .clone()
                .or_else(|| summary.description.clone()),
            canonical_url: summary.canonical_url.clone(),
            extra,
        };

        fs::write(article_dir.join("content.md"), &content).await?;
        fs::write(
            article_dir.join("metadata.json"),
            serde_json::to_string_pretty(&article)?,
        )
        .await?;
        debug!(id, dir = %article_dir.display(), "Wrote article outputs");

        let recommendation = RecommendationRecord {
            id: id.to_string(),
            title,
            post_date: article.post_date.clone(),
            cover_image: cover_image.as_ref().and_then(|c| c.resolve()).map(String::from),
            description: article.description.clone(),
        };

        sleep(self.config.article_delay).await;
        info!(id, images = images_fetched, "Processed article");

        Ok(ProcessOutcome {
            article,
            recommendation,
            images_fetched,
        })
    }

    /// Resolve a possibly-relative image reference against the source base
    /// URL. References that cannot form a URL are dropped.
    fn resolve_image_url(&self, reference: &str) -> Option<String> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Some(reference.to_string());
        }
        Url::parse(&self.config.base_url)
            .ok()?
            .join(reference)
            .ok()
            .map(|u| u.to_string())
    }
}
