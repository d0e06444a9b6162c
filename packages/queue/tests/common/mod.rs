#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docqueue::{JobEvent, ManualClock, Queue};
use docqueue_core::timestamp;
use docqueue_db::{
    DocumentStore, Indexed, MemoryStore, SearchQuery, StoreError, StoredDocument, Version,
};
use serde_json::Value;
use tokio::sync::broadcast;

pub const INDEX: &str = "jobs";
pub const FROZEN_AT: &str = "2016-04-02T01:02:03.456Z";

/// One call made against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Index {
        doc_type: String,
        body: Value,
    },
    Get {
        id: String,
    },
    Search {
        doc_type: String,
        size: usize,
        query: SearchQuery,
    },
    Update {
        id: String,
        expected: Version,
        patch: Value,
    },
}

/// A [`MemoryStore`] that records every call and can fail searches on demand.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    calls: Mutex<Vec<Call>>,
    failing_searches: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn searches(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Search { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    pub fn search_count(&self) -> usize {
        self.searches().len()
    }

    pub fn indexes(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Index { doc_type, body } => Some((doc_type, body)),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, Version, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update {
                    id,
                    expected,
                    patch,
                } => Some((id, expected, patch)),
                _ => None,
            })
            .collect()
    }

    /// Make the next `n` searches fail with a query error.
    pub fn fail_next_searches(&self, n: usize) {
        self.failing_searches.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl DocumentStore for RecordingStore {
    async fn index(
        &self,
        index: &str,
        doc_type: &str,
        document: Value,
    ) -> Result<Indexed, StoreError> {
        self.record(Call::Index {
            doc_type: doc_type.to_string(),
            body: document.clone(),
        });
        self.inner.index(index, doc_type, document).await
    }

    async fn get(&self, index: &str, doc_type: &str, id: &str) -> Result<StoredDocument, StoreError> {
        self.record(Call::Get { id: id.to_string() });
        self.inner.get(index, doc_type, id).await
    }

    async fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &SearchQuery,
        size: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        self.record(Call::Search {
            doc_type: doc_type.to_string(),
            size,
            query: query.clone(),
        });
        let fail = self
            .failing_searches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Query("injected search failure".into()));
        }
        self.inner.search(index, doc_type, query, size).await
    }

    async fn update(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        expected: Version,
        patch: Value,
    ) -> Result<Version, StoreError> {
        self.record(Call::Update {
            id: id.to_string(),
            expected,
            patch: patch.clone(),
        });
        self.inner.update(index, doc_type, id, expected, patch).await
    }
}

pub fn at(s: &str) -> chrono::DateTime<chrono::Utc> {
    timestamp::parse(s).unwrap()
}

pub fn frozen_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(FROZEN_AT)))
}

/// A queue over a recording store, on the system clock.
pub fn setup() -> (Arc<RecordingStore>, Queue<RecordingStore>) {
    let store = Arc::new(RecordingStore::new());
    let queue = Queue::new(store.clone(), INDEX);
    (store, queue)
}

/// A queue over a recording store whose clock only moves when told to.
pub fn setup_frozen() -> (Arc<RecordingStore>, Queue<RecordingStore>, Arc<ManualClock>) {
    let store = Arc::new(RecordingStore::new());
    let clock = frozen_clock();
    let queue = Queue::with_clock(store.clone(), INDEX, clock.clone());
    (store, queue, clock)
}

/// Wait for the first event matching `pred`.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<JobEvent>, pred: F) -> JobEvent
where
    F: Fn(&JobEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event hub closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub fn is_completed(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobCompleted { .. })
}

pub fn is_failed(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobFailed { .. })
}
