//! The document store contract consumed by the queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SearchQuery, StoreError};

/// Store-assigned concurrency token. Only ever compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version of a freshly indexed document.
    pub const INITIAL: Version = Version(1);

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of indexing a new document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed {
    pub id: String,
    pub version: Version,
}

/// A document body together with its id and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: Version,
    pub source: Value,
}

/// Versioned document store.
///
/// Documents live in an `index` and carry a `doc_type`; every operation is
/// scoped to both. `update` is conditional: it succeeds only when the stored
/// version equals `expected`, and reports [`StoreError::VersionConflict`]
/// otherwise.
pub trait DocumentStore: Send + Sync + 'static {
    /// Store a new document; the store assigns its id.
    fn index(
        &self,
        index: &str,
        doc_type: &str,
        document: Value,
    ) -> impl Future<Output = Result<Indexed, StoreError>> + Send;

    /// Fetch a document, or [`StoreError::NotFound`].
    fn get(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> impl Future<Output = Result<StoredDocument, StoreError>> + Send;

    /// At most `size` documents of `doc_type` matching `query`.
    fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &SearchQuery,
        size: usize,
    ) -> impl Future<Output = Result<Vec<StoredDocument>, StoreError>> + Send;

    /// Merge `patch` into the document if its version is still `expected`.
    /// Returns the new version.
    fn update(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        expected: Version,
        patch: Value,
    ) -> impl Future<Output = Result<Version, StoreError>> + Send;
}
