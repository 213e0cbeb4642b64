//! Error taxonomy for the ingest and publish stages.
//!
//! Failures fall into two classes. Unit failures — one article, one asset,
//! one aggregate file — are recovered at the orchestrating level: they are
//! recorded in the progress ledger, counted, and the run continues.
//! Stage-fatal failures ([`PipelineError::CorruptState`] and
//! [`PipelineError::Configuration`]) abort the run and surface to the
//! operator with a nonzero exit status.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network-level failure (timeout, connect, 5xx) that survived the full
    /// retry budget. Becomes a unit failure for the owning article or asset.
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    TransientFetch {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    /// The remote source returned something we cannot use (unexpected status,
    /// undecodable body). Not retried.
    #[error("unexpected payload from {url}: {reason}")]
    MalformedData { url: String, reason: String },

    /// Object storage refused an operation with a status we do not accept.
    #[error("object storage rejected {object}: status {status}: {body}")]
    StorageRejection {
        object: String,
        status: u16,
        body: String,
    },

    /// A progress file exists but cannot be parsed. Stage-fatal.
    #[error("progress file {path} is unreadable: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A required local precondition is missing (e.g. the articles directory
    /// for publishing). Stage-fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether this error must abort the whole stage rather than a single unit.
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::CorruptState { .. } | PipelineError::Configuration(_)
        )
    }
}
