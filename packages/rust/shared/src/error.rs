//! Error types for CatalogSync.
//!
//! Library crates use [`CatalogSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Variants follow the failure scopes of an import job: row-local
//! ([`CatalogSyncError::RowParse`]) and item-local
//! ([`CatalogSyncError::Enrichment`]) errors are counted and skipped by the
//! pipeline, everything else terminates the current job.

use std::path::PathBuf;

use crate::types::JobPhase;

/// Top-level error type for all CatalogSync operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Storage or queue unreachable.
    #[error("connection error: {0}")]
    Connection(String),

    /// CSV fetch failed (network, non-2xx, truncated transfer).
    #[error("download error: {0}")]
    Download(String),

    /// The CSV header does not carry the expected columns.
    #[error("schema mismatch: {message}")]
    Schema { message: String },

    /// A single row could not be turned into a product.
    #[error("row {row}: {message}")]
    RowParse { row: u64, message: String },

    /// A bulk upsert was not acknowledged by storage.
    #[error("batch {batch} ({size} documents) failed: {message}")]
    BatchWrite {
        batch: usize,
        size: usize,
        message: String,
    },

    /// The external generation service failed or timed out.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Terminal report of a failed vendor job.
    #[error("import job for vendor '{vendor}' failed while {phase}: {source}")]
    Job {
        vendor: String,
        phase: JobPhase,
        #[source]
        source: Box<CatalogSyncError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CatalogSyncError>;

impl CatalogSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a schema mismatch error from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    /// Create a row-local parse error.
    pub fn row(row: u64, msg: impl Into<String>) -> Self {
        Self::RowParse {
            row,
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach vendor and phase to a job-fatal error.
    pub fn job(vendor: impl Into<String>, phase: JobPhase, source: CatalogSyncError) -> Self {
        Self::Job {
            vendor: vendor.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Whether retrying the failed operation can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Download(_)
                | Self::Enrichment(_)
                | Self::Storage(_)
                | Self::BatchWrite { .. }
        )
    }

    /// Phase a failed job was in, if this is a job report.
    pub fn phase(&self) -> Option<JobPhase> {
        match self {
            Self::Job { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
