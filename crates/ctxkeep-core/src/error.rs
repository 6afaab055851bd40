//! Error taxonomy for the ctxkeep engine.

use std::time::Duration;

use ctxkeep_state::StorageError;

use crate::checkpoint::{RestoreStep, SnapshotStep};

fn step_list(steps: &[RestoreStep]) -> String {
    if steps.is_empty() {
        return "none".to_string();
    }
    steps
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// ctxkeep engine errors.
#[derive(Debug, thiserror::Error)]
pub enum CtxKeepError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("capacity error: {0}")]
    Capacity(String),

    /// A checkpoint step failed; no catalog entry was written.
    #[error("snapshot failed at {step}: {reason}")]
    SnapshotFailure { step: SnapshotStep, reason: String },

    /// A restore step failed after the earlier steps were applied.
    #[error(
        "restore failed at {failed_step}: {reason} (completed: {}, remaining: {})",
        step_list(.completed),
        step_list(.remaining)
    )]
    RestoreFailure {
        failed_step: RestoreStep,
        completed: Vec<RestoreStep>,
        remaining: Vec<RestoreStep>,
        reason: String,
    },

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("checkpoint artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for ctxkeep engine operations.
pub type Result<T> = std::result::Result<T, CtxKeepError>;
