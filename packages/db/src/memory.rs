//! Process-local document store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use ulid::Ulid;

use crate::query::{compare, lookup};
use crate::{DocumentStore, Indexed, SearchQuery, StoreError, StoredDocument, Version};

#[derive(Debug, Clone)]
struct Entry {
    doc_type: String,
    version: Version,
    source: Value,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, HashMap<String, Entry>>,
    seq: u64,
}

/// In-memory [`DocumentStore`] with per-document versions.
///
/// Every mutation happens under one lock, so the version check and the write
/// of a conditional update are atomic. Share it between queues with an `Arc`
/// to model several processes talking to one store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of documents in `index`, across all types.
    pub fn len(&self, index: &str) -> usize {
        self.lock().indices.get(index).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }
}

fn not_found(index: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        index: index.to_string(),
        id: id.to_string(),
    }
}

fn as_object(value: Value, what: &str) -> Result<Map<String, Value>, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "{} must be an object, got {}",
            what, other
        ))),
    }
}

/// Recursive object merge; non-object values replace.
fn merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn index(
        &self,
        index: &str,
        doc_type: &str,
        document: Value,
    ) -> Result<Indexed, StoreError> {
        let source = Value::Object(as_object(document, "document")?);
        let id = Ulid::new().to_string();

        let mut inner = self.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner.indices.entry(index.to_string()).or_default().insert(
            id.clone(),
            Entry {
                doc_type: doc_type.to_string(),
                version: Version::INITIAL,
                source,
                seq,
            },
        );

        Ok(Indexed {
            id,
            version: Version::INITIAL,
        })
    }

    async fn get(&self, index: &str, doc_type: &str, id: &str) -> Result<StoredDocument, StoreError> {
        let inner = self.lock();
        inner
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .filter(|entry| entry.doc_type == doc_type)
            .map(|entry| StoredDocument {
                id: id.to_string(),
                version: entry.version,
                source: entry.source.clone(),
            })
            .ok_or_else(|| not_found(index, id))
    }

    async fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &SearchQuery,
        size: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let inner = self.lock();
        let Some(docs) = inner.indices.get(index) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(&String, &Entry)> = docs
            .iter()
            .filter(|(_, entry)| entry.doc_type == doc_type && query.matches(&entry.source))
            .collect();

        hits.sort_by(|(_, a), (_, b)| {
            let by_field = query.sort.as_ref().map(|sort| {
                match (lookup(&a.source, &sort.field), lookup(&b.source, &sort.field)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
            by_field
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });

        Ok(hits
            .into_iter()
            .take(size)
            .map(|(id, entry)| StoredDocument {
                id: id.clone(),
                version: entry.version,
                source: entry.source.clone(),
            })
            .collect())
    }

    async fn update(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        expected: Version,
        patch: Value,
    ) -> Result<Version, StoreError> {
        let patch = as_object(patch, "patch")?;

        let mut inner = self.lock();
        let entry = inner
            .indices
            .get_mut(index)
            .and_then(|docs| docs.get_mut(id))
            .filter(|entry| entry.doc_type == doc_type)
            .ok_or_else(|| not_found(index, id))?;

        if entry.version != expected {
            return Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected,
                actual: entry.version,
            });
        }

        if let Value::Object(source) = &mut entry.source {
            merge(source, patch);
        }
        entry.version = entry.version.next();

        Ok(entry.version)
    }
}
