//! Asset fetcher: localizes a single binary resource (image) to disk.
//!
//! Downloads run under a per-article concurrency bound shared across all of
//! that article's assets. A destination that already exists with nonzero size
//! is skipped and reported as success (dedup by presence, not content hash).
//! Per-asset failures are reported to the caller but never abort sibling
//! fetches or the owning article.

use crate::errors::Result;
use crate::fetch::get_with_retry;
use crate::models::ImageAsset;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// The extensions we accept as image assets.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Whether a file name carries a known image extension.
pub fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// MIME-implied extension for a remote image URL, falling back to `jpg`.
pub fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or("jpg")
}

/// Deterministic local file name for a remote image URL.
///
/// The name is the md5 of the URL, so the same logical asset always lands at
/// the same path across runs and the presence check in [`fetch_image`] makes
/// re-downloads a no-op.
pub fn local_image_name(url: &str) -> String {
    format!("{:x}.{}", md5::compute(url.as_bytes()), extension_for(url))
}

/// Download one image to `dest`, skipping the transfer when the destination
/// already exists with nonzero size.
#[instrument(level = "debug", skip(client))]
pub async fn fetch_image(
    client: &Client,
    url: &str,
    dest: &Path,
    max_retries: usize,
    base_delay: Duration,
) -> Result<ImageAsset> {
    let extension = extension_for(url).to_string();

    if let Ok(meta) = fs::metadata(dest).await {
        if meta.len() > 0 {
            debug!(dest = %dest.display(), "Image already present; skipping download");
            return Ok(ImageAsset {
                path: dest.to_path_buf(),
                bytes: meta.len(),
                extension,
            });
        }
    }

    let resp = get_with_retry(client, url, max_retries, base_delay).await?;
    let bytes = resp.bytes().await?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(dest, &bytes).await?;
    debug!(dest = %dest.display(), bytes = bytes.len(), "Downloaded image");

    Ok(ImageAsset {
        path: dest.to_path_buf(),
        bytes: bytes.len() as u64,
        extension,
    })
}

/// Outcome of one asset fetch: the remote URL paired with its result.
pub type FetchOutcome = (String, Result<ImageAsset>);

/// Fetch a set of images into `images_dir` under a fixed concurrency bound.
///
/// Destination names come from [`local_image_name`]. The returned vector has
/// one entry per input URL; failed fetches carry their error instead of
/// aborting the batch.
#[instrument(level = "debug", skip_all, fields(count = urls.len()))]
pub async fn fetch_all(
    client: &Client,
    urls: &[String],
    images_dir: &Path,
    max_concurrent: usize,
    max_retries: usize,
    base_delay: Duration,
) -> Vec<FetchOutcome> {
    let outcomes: Vec<FetchOutcome> = stream::iter(urls.iter().cloned())
        .map(|url| {
            let dest: PathBuf = images_dir.join(local_image_name(&url));
            async move {
                let result = fetch_image(client, &url, &dest, max_retries, base_delay).await;
                if let Err(ref e) = result {
                    warn!(%url, error = %e, "Image fetch failed; continuing with siblings");
                }
                (url, result)
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;
    outcomes
}
