//! Persistent progress ledger shared by the crawl and publish stages.
//!
//! Each stage keeps its own ledger file (`crawl_progress.json`,
//! `oss_upload_progress.json`). The ledger records which units completed,
//! which failed and why, plus derived counters and the last run's statistics.
//! Every mutation flushes to disk synchronously, so a crash between units
//! never loses more than the unit in flight.
//!
//! The ledger has no internal locking: it is only ever mutated from the
//! single coordinating task of a stage. Concurrent workers report their
//! outcomes back to that owner instead of touching the ledger directly.

use crate::errors::{PipelineError, Result};
use crate::models::UploadStats;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// On-disk ledger shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    completed: BTreeSet<String>,
    #[serde(default)]
    failed: BTreeMap<String, String>,
    #[serde(default)]
    counters: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stats: Option<UploadStats>,
}

/// A progress ledger bound to its backing file.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    ledger: LedgerFile,
}

impl ProgressLedger {
    /// Load the ledger from `path`.
    ///
    /// A missing file yields an empty ledger. A file that exists but cannot
    /// be parsed yields [`PipelineError::CorruptState`]; callers decide
    /// whether that is fatal or warn-and-start-empty.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = match fs::read_to_string(&path).await {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|source| PipelineError::CorruptState {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No prior progress file; starting empty");
                LedgerFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            completed = ledger.completed.len(),
            failed = ledger.failed.len(),
            "Loaded progress ledger"
        );
        Ok(Self { path, ledger })
    }

    /// Overwrite the backing file with the current state.
    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.ledger)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, json).await?;
        Ok(())
    }

    pub fn is_done(&self, id: &str) -> bool {
        self.ledger.completed.contains(id)
    }

    /// Record a unit as completed and flush. Clears any prior failure for the
    /// same id; a unit never moves back from completed to failed.
    pub async fn mark_done(&mut self, id: &str) -> Result<()> {
        self.ledger.failed.remove(id);
        self.ledger.completed.insert(id.to_string());
        self.save().await
    }

    /// Record a unit failure and flush. A unit already completed stays
    /// completed; the failure is dropped.
    pub async fn mark_failed(&mut self, id: &str, reason: &str) -> Result<()> {
        if self.ledger.completed.contains(id) {
            debug!(id, "Ignoring failure for already-completed unit");
            return Ok(());
        }
        self.ledger.failed.insert(id.to_string(), reason.to_string());
        self.save().await
    }

    /// Add to a derived counter and flush.
    pub async fn add_counter(&mut self, key: &str, delta: u64) -> Result<()> {
        *self.ledger.counters.entry(key.to_string()).or_insert(0) += delta;
        self.save().await
    }

    /// Persist end-of-run statistics and flush.
    pub async fn set_stats(&mut self, stats: UploadStats) -> Result<()> {
        self.ledger.stats = Some(stats);
        self.save().await
    }

    /// Clear all recorded progress and flush.
    pub async fn reset(&mut self) -> Result<()> {
        self.ledger = LedgerFile::default();
        self.save().await
    }

    pub fn completed_count(&self) -> usize {
        self.ledger.completed.len()
    }

    pub fn failed(&self) -> &BTreeMap<String, String> {
        &self.ledger.failed
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.ledger.counters.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::load(dir.path().join("progress.json"))
            .await
            .unwrap();
        assert_eq!(ledger.completed_count(), 0);
        assert!(ledger.failed().is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed_file_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, "{not json").await.unwrap();
        let err = ProgressLedger::load(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn test_mark_done_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).await.unwrap();
        ledger.mark_done("42").await.unwrap();

        // A fresh load (simulating a restart) sees the completion.
        let reloaded = ProgressLedger::load(&path).await.unwrap();
        assert!(reloaded.is_done("42"));
    }

    #[tokio::test]
    async fn test_failed_unit_can_complete_but_not_the_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).await.unwrap();
        ledger.mark_failed("a", "timeout").await.unwrap();
        assert_eq!(ledger.failed().get("a").unwrap(), "timeout");

        // Retry succeeded: failed -> completed.
        ledger.mark_done("a").await.unwrap();
        assert!(ledger.is_done("a"));
        assert!(ledger.failed().is_empty());

        // A late failure report for a completed unit is dropped.
        ledger.mark_failed("a", "late report").await.unwrap();
        assert!(ledger.is_done("a"));
        assert!(ledger.failed().is_empty());
    }

    #[tokio::test]
    async fn test_counters_and_stats_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).await.unwrap();
        ledger.add_counter("images_downloaded", 7).await.unwrap();
        ledger.add_counter("images_downloaded", 3).await.unwrap();
        ledger
            .set_stats(UploadStats {
                total_articles: 10,
                uploaded: 9,
                failed: 1,
                timestamp: "2025-01-01T00:00:00Z".to_string(),
                bucket: "nlp-newsletter".to_string(),
                endpoint: "http://localhost:9011".to_string(),
            })
            .await
            .unwrap();

        let reloaded = ProgressLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.counter("images_downloaded"), 10);
        assert_eq!(reloaded.ledger.stats.as_ref().unwrap().uploaded, 9);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut ledger = ProgressLedger::load(&path).await.unwrap();
        ledger.mark_done("1").await.unwrap();
        ledger.mark_failed("2", "nope").await.unwrap();
        ledger.reset().await.unwrap();

        let reloaded = ProgressLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.completed_count(), 0);
        assert!(reloaded.failed().is_empty());
    }
}
