//! Error types for checkpoint orchestration

use checkpoint_store::{CheckpointStatus, StoreError, ValidationError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors surfaced by the cache service and the checkpoint manager
///
/// Corrupted fast-tier entries and logically expired records are not errors;
/// they resolve to `Ok(None)`.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Schema violation on write or read-back
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Operation on an id that is not present
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Progress reported against a checkpoint that already finished
    #[error("Checkpoint {checkpoint_id} is {status} and no longer accepts progress")]
    Terminal {
        checkpoint_id: Uuid,
        status: CheckpointStatus,
    },

    /// Only an oversized stub exists and there is no durable copy to merge into
    #[error("Checkpoint {0} is cached as an oversized stub with no durable copy")]
    NoMergeBase(Uuid),

    /// Fast-tier write succeeded but the durable write did not
    #[error("Durable sync failed for checkpoint {checkpoint_id}: {source}")]
    DurableSync {
        checkpoint_id: Uuid,
        #[source]
        source: StoreError,
    },

    /// Collaborator failure, propagated verbatim
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CheckpointError {
    /// Whether the error left the two tiers out of step
    pub fn is_durable_sync(&self) -> bool {
        matches!(self, CheckpointError::DurableSync { .. })
    }
}
