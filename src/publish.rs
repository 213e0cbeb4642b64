//! Publisher: republish crawled articles to the object-storage endpoint.
//!
//! For every local article directory the publisher uploads the article's
//! assets, builds a mapping from every local path spelling to the resulting
//! public URL, rewrites the content body and metadata through that mapping,
//! uploads the rewritten objects, and only then marks the identifier done in
//! the publish ledger — a partially uploaded article is retried as a whole on
//! the next run. After all articles, whitelisted aggregate JSON files under
//! `data/` get the same image-path rewriting with the accumulated mapping and
//! are re-uploaded.
//!
//! A single upload failure fails that article (or that aggregate file) only;
//! the pass over the remaining articles continues.

use crate::config::UploadConfig;
use crate::errors::{PipelineError, Result};
use crate::models::{ArticleMetadata, CoverImage, UploadStats};
use crate::oss::{bucket_name_for, OssClient};
use crate::progress::ProgressLedger;
use crate::assets;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Aggregate files whose embedded image paths are rewritten before upload.
const GLOBAL_REWRITE_FILES: &[&str] = &[
    "processed_articles.json",
    "articles_metadata.json",
    "recommendation_data.json",
];

/// A candidate local image reference: optional `../` prefixes, optional
/// `images/` directory, then a file name with a known image extension.
static IMAGE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\.\./)*(?:images/)?[A-Za-z0-9_%.\-]+\.(?:jpg|jpeg|png|gif|webp)")
        .expect("static pattern")
});

/// Strip relative-path prefixes so every spelling of the same logical asset
/// shares one canonical key.
fn canonical_image_key(spelling: &str) -> &str {
    let mut s = spelling;
    while let Some(rest) = s.strip_prefix("../") {
        s = rest;
    }
    s
}

/// Look a spelling up in the path→URL mapping, trying the canonical key
/// first and the bare file name second. Remote URLs never fall back to the
/// bare name: a trailing filename that collides with a mapped local asset
/// must not hijack a reference that is still remote.
fn map_spelling<'a>(mapping: &'a HashMap<String, String>, spelling: &str) -> Option<&'a String> {
    let canonical = canonical_image_key(spelling);
    mapping.get(canonical).or_else(|| {
        if canonical.starts_with("http://") || canonical.starts_with("https://") {
            return None;
        }
        canonical
            .rsplit('/')
            .next()
            .and_then(|name| mapping.get(name))
    })
}

/// Replace every textual occurrence of a mapped local image path with its
/// public URL, in a single pass.
///
/// Matches immediately preceded by `/` are left alone: they are tails of
/// longer paths or of still-remote URLs, not standalone local references.
pub fn rewrite_image_refs(text: &str, mapping: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for m in IMAGE_REF.find_iter(text) {
        if text[..m.start()].ends_with('/') {
            continue;
        }
        if let Some(url) = map_spelling(mapping, m.as_str()) {
            out.push_str(&text[last..m.start()]);
            out.push_str(url);
            last = m.end();
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Rewrite the metadata's cover-image field and content-image list through
/// the mapping, leaving unmapped references untouched.
fn rewrite_metadata(metadata: &mut ArticleMetadata, mapping: &HashMap<String, String>) {
    if let Some(resolved) = metadata.cover_image.as_ref().and_then(|c| c.resolve()) {
        if let Some(url) = map_spelling(mapping, resolved) {
            metadata.cover_image = Some(CoverImage::Direct(url.clone()));
        }
    }
    metadata.content_images = metadata
        .content_images
        .iter()
        .map(|img| map_spelling(mapping, img).cloned().unwrap_or_else(|| img.clone()))
        .collect();
}

/// Runs the publish stage over one crawled output tree.
pub struct Publisher {
    config: UploadConfig,
    oss: OssClient,
}

impl Publisher {
    pub fn new(config: UploadConfig) -> Result<Self> {
        let oss = OssClient::new(&config.endpoint, config.request_timeout)?;
        Ok(Self { config, oss })
    }

    /// Publish every article directory and the global aggregate files.
    ///
    /// Bucket provisioning failures and a corrupt ledger abort the stage;
    /// per-article and per-file upload failures are recorded and skipped.
    #[instrument(level = "info", skip_all)]
    pub async fn publish_all(&self) -> Result<UploadStats> {
        let mut ledger = ProgressLedger::load(self.config.progress_file()).await?;

        let bucket = bucket_name_for(&self.config.source);
        info!(bucket, endpoint = self.oss.endpoint(), "Setting up bucket");
        self.oss.create_bucket(&bucket).await?;
        self.oss.make_public(&bucket).await?;

        let articles_dir = self.config.articles_dir();
        if !articles_dir.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "articles directory not found: {}",
                articles_dir.display()
            )));
        }

        let mut article_dirs: Vec<PathBuf> = std::fs::read_dir(&articles_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        article_dirs.sort();
        info!(count = article_dirs.len(), "Found local articles to publish");

        let mut uploaded = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        let mut global_mapping: HashMap<String, String> = HashMap::new();

        for article_dir in &article_dirs {
            let id = article_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if ledger.is_done(&id) {
                info!(id = %id, "Skipping already uploaded article");
                // The aggregate pass still needs this article's path→URL
                // entries, rebuilt from the deterministic object layout.
                global_mapping.extend(self.recorded_mapping(article_dir, &id, &bucket).await);
                skipped += 1;
                continue;
            }

            match self.publish_article(article_dir, &id, &bucket).await {
                Ok(mapping) => {
                    global_mapping.extend(mapping);
                    // Marked done only after every upload for this article
                    // succeeded; partial uploads retry whole next run.
                    ledger.mark_done(&id).await?;
                    uploaded += 1;
                    info!(id = %id, "Uploaded article");
                }
                Err(e) if e.is_stage_fatal() => return Err(e),
                Err(e) => {
                    error!(id = %id, error = %e, "Article upload failed; continuing");
                    ledger.mark_failed(&id, &e.to_string()).await?;
                    failed += 1;
                }
            }

            sleep(self.config.article_delay).await;
        }

        self.publish_global_files(&bucket, &global_mapping).await;

        let stats = UploadStats {
            total_articles: article_dirs.len(),
            uploaded,
            failed,
            timestamp: Local::now().to_rfc3339(),
            bucket: bucket.clone(),
            endpoint: self.oss.endpoint().to_string(),
        };
        ledger.set_stats(stats.clone()).await?;

        info!(
            total = stats.total_articles,
            uploaded,
            failed,
            skipped,
            bucket = %bucket,
            endpoint = self.oss.endpoint(),
            public_base = %format!("{}/{}/", self.oss.endpoint(), bucket),
            "Upload summary"
        );
        Ok(stats)
    }

    /// Upload one article's assets, rewritten content and metadata.
    ///
    /// Returns the local-spelling → public-URL mapping built along the way.
    /// Any single upload failure propagates, failing the whole article.
    #[instrument(level = "info", skip_all, fields(%id))]
    async fn publish_article(
        &self,
        article_dir: &Path,
        id: &str,
        bucket: &str,
    ) -> Result<HashMap<String, String>> {
        let metadata_path = article_dir.join("metadata.json");
        let raw_metadata = fs::read_to_string(&metadata_path).await.map_err(|e| {
            PipelineError::MalformedData {
                url: metadata_path.display().to_string(),
                reason: format!("metadata unreadable: {e}"),
            }
        })?;
        let mut metadata: ArticleMetadata =
            serde_json::from_str(&raw_metadata).map_err(|e| PipelineError::MalformedData {
                url: metadata_path.display().to_string(),
                reason: format!("metadata undecodable: {e}"),
            })?;

        let content_path = article_dir.join("content.md");
        let content = fs::read_to_string(&content_path).await.map_err(|e| {
            PipelineError::MalformedData {
                url: content_path.display().to_string(),
                reason: format!("content unreadable: {e}"),
            }
        })?;

        let mut mapping: HashMap<String, String> = HashMap::new();

        // Every image under the article's own images directory.
        let images_dir = article_dir.join("images");
        if images_dir.is_dir() {
            let mut entries = fs::read_dir(&images_dir).await?;
            let mut image_files: Vec<PathBuf> = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if path.is_file() && assets::is_image_file(&name) {
                    image_files.push(path);
                }
            }
            image_files.sort();

            for path in image_files {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let object_name = format!("articles/{id}/images/{name}");
                let url = self
                    .oss
                    .upload_file(bucket, &object_name, &path, None)
                    .await?;
                mapping.insert(format!("images/{name}"), url.clone());
                mapping.insert(name, url);
            }
        }

        // Cover image: both bare-string and structured representations,
        // falling back to the shared image directory at the tree root.
        if let Some(cover) = metadata
            .cover_image
            .as_ref()
            .and_then(|c| c.resolve())
            .map(str::to_string)
        {
            if let Some(file_name) = cover.strip_prefix("images/") {
                if !mapping.contains_key(cover.as_str()) {
                    let global_path = self.config.base_dir.join("images").join(file_name);
                    if global_path.is_file() {
                        let object_name = format!("articles/{id}/images/{file_name}");
                        let url = self
                            .oss
                            .upload_file(bucket, &object_name, &global_path, None)
                            .await?;
                        mapping.insert(cover.clone(), url.clone());
                        mapping.insert(file_name.to_string(), url);
                    } else {
                        warn!(id, cover = %cover, "Cover image not found locally");
                    }
                }
            }
        }

        // Content images that still resolve only through the shared root.
        for img in metadata.content_images.clone() {
            if img.starts_with("images/") && map_spelling(&mapping, &img).is_none() {
                let local_path = self.config.base_dir.join(&img);
                if local_path.is_file() {
                    let file_name = local_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default()
                        .to_string();
                    let object_name = format!("articles/{id}/images/{file_name}");
                    let url = self
                        .oss
                        .upload_file(bucket, &object_name, &local_path, None)
                        .await?;
                    mapping.insert(img.clone(), url);
                }
            }
        }

        rewrite_metadata(&mut metadata, &mapping);
        let rewritten_content = rewrite_image_refs(&content, &mapping);

        self.oss
            .upload_bytes(
                bucket,
                &format!("articles/{id}/content.md"),
                rewritten_content.into_bytes(),
                "content.md",
                None,
            )
            .await?;
        self.oss
            .upload_json(
                bucket,
                &format!("articles/{id}/metadata.json"),
                &serde_json::to_value(&metadata)?,
            )
            .await?;

        Ok(mapping)
    }

    /// Mapping entries for an article uploaded in an earlier run.
    ///
    /// Object names follow a fixed layout, so the public URLs can be rebuilt
    /// from the local image names without touching the endpoint. Covers
    /// uploaded from the shared image root are recovered from the metadata,
    /// since they never land in the article's own images directory. Best
    /// effort: unreadable local state just yields fewer entries.
    async fn recorded_mapping(
        &self,
        article_dir: &Path,
        id: &str,
        bucket: &str,
    ) -> HashMap<String, String> {
        let mut names: Vec<String> = Vec::new();

        if let Ok(mut entries) = fs::read_dir(article_dir.join("images")).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_file() && assets::is_image_file(&name) {
                    names.push(name);
                }
            }
        }

        if let Ok(raw) = fs::read_to_string(article_dir.join("metadata.json")).await {
            if let Ok(metadata) = serde_json::from_str::<ArticleMetadata>(&raw) {
                let refs = metadata
                    .cover_image
                    .as_ref()
                    .and_then(|c| c.resolve())
                    .map(str::to_string)
                    .into_iter()
                    .chain(metadata.content_images.iter().cloned());
                for spelling in refs {
                    if let Some(name) = spelling.strip_prefix("images/") {
                        names.push(name.to_string());
                    }
                }
            }
        }

        let mut mapping = HashMap::new();
        for name in names {
            let url = self
                .oss
                .public_url(bucket, &format!("articles/{id}/images/{name}"));
            mapping.insert(format!("images/{name}"), url.clone());
            mapping.insert(name, url);
        }
        mapping
    }

    /// Upload the aggregate JSON files under `data/`, rewriting image-path
    /// literals in the whitelisted ones through the accumulated mapping.
    /// Per-file failures are logged and do not abort the pass.
    async fn publish_global_files(&self, bucket: &str, mapping: &HashMap<String, String>) {
        let data_dir = self.config.data_dir();
        if !data_dir.is_dir() {
            return;
        }
        let mut json_files: Vec<PathBuf> = match std::fs::read_dir(&data_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not list data directory");
                return;
            }
        };
        json_files.sort();

        info!(count = json_files.len(), "Uploading global metadata files");
        for path in json_files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if let Err(e) = self.publish_global_file(bucket, &path, &name, mapping).await {
                warn!(file = %name, error = %e, "Global file upload failed; continuing");
            }
        }
    }

    async fn publish_global_file(
        &self,
        bucket: &str,
        path: &Path,
        name: &str,
        mapping: &HashMap<String, String>,
    ) -> Result<()> {
        let mut raw = fs::read_to_string(path).await?;
        if GLOBAL_REWRITE_FILES.contains(&name) {
            raw = rewrite_image_refs(&raw, mapping);
        }
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| PipelineError::MalformedData {
                url: path.display().to_string(),
                reason: format!("aggregate undecodable after rewrite: {e}"),
            })?;
        self.oss
            .upload_json(bucket, &format!("data/{name}"), &value)
            .await?;
        Ok(())
    }
}
