use thiserror::Error;

use crate::Version;

/// Store errors.
///
/// `VersionConflict` is an expected outcome of a conditional update and is
/// kept distinct from transport or query faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: Version,
        actual: Version,
    },
    #[error("Not found: {index}/{id}")]
    NotFound { index: String, id: String },
    #[error("Invalid index name: {0}")]
    InvalidIndex(String),
    #[error("Invalid field path: {0}")]
    InvalidField(String),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
