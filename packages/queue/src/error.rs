use docqueue_core::ValidationError;
use docqueue_db::StoreError;
use thiserror::Error;

/// Errors surfaced by queue, job and worker operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed job document {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl QueueError {
    /// True for a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Store(e) if e.is_conflict())
    }
}
