//! Data models for newsletter articles and their published representations.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`ArticleSummary`]: one entry of the remote archive index
//! - [`PostPayload`]: the per-article content endpoint body
//! - [`CoverImage`]: cover reference that arrives either as a bare string or
//!   as a structured object
//! - [`ArticleMetadata`]: the persisted `metadata.json` shape
//! - [`RecommendationRecord`]: slim record for downstream consumption
//! - [`ImageAsset`], [`CrawlStats`], [`UploadStats`]
//!
//! The remote schema is an external contract that evolves; every remote-facing
//! struct defaults missing optional fields and preserves unknown extra fields
//! opaquely through a flattened map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A cover-image reference as the remote source (and our own metadata files)
/// spell it: either a direct path/URL string or a structured object carrying
/// `url` and/or `path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CoverImage {
    /// A bare path or URL string.
    Direct(String),
    /// A structured object; `url` wins over `path` when both are set.
    Structured {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

impl CoverImage {
    /// Resolve either representation to a single canonical string.
    pub fn resolve(&self) -> Option<&str> {
        match self {
            CoverImage::Direct(s) if !s.is_empty() => Some(s),
            CoverImage::Direct(_) => None,
            CoverImage::Structured { url, path } => url
                .as_deref()
                .filter(|s| !s.is_empty())
                .or_else(|| path.as_deref().filter(|s| !s.is_empty())),
        }
    }
}

/// One entry of the paginated archive index.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArticleSummary {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    /// Unknown fields from the remote source, preserved opaquely.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArticleSummary {
    /// Stable string identifier for this article: the numeric id when the
    /// source provides one, the slug otherwise.
    pub fn article_id(&self) -> Option<String> {
        self.id
            .map(|id| id.to_string())
            .or_else(|| self.slug.clone().filter(|s| !s.is_empty()))
    }
}

/// Body of the per-article content endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The per-article `metadata.json` shape, also aggregated into
/// `data/processed_articles.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub cover_image: Option<CoverImage>,
    /// Ordered inline image references as spelled in the content body.
    #[serde(default)]
    pub content_images: Vec<String>,
    /// Relative paths of the assets actually fetched to local storage.
    #[serde(default)]
    pub local_images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Slim article record intended for downstream recommendation consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub post_date: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A binary resource localized to disk by the asset fetcher.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub bytes: u64,
    pub extension: String,
}

/// End-of-run statistics for the crawl stage.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStats {
    pub total_articles: usize,
    pub processed_articles: usize,
    pub total_images: usize,
    pub output_directory: PathBuf,
}

/// End-of-run statistics persisted into the publish ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadStats {
    pub total_articles: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub timestamp: String,
    pub bucket: String,
    pub endpoint: String,
}
