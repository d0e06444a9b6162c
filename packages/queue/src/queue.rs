//! The context shared by jobs and workers of one index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use docqueue_core::{Clock, Emitter, JobEvent, JobId, SystemClock, WorkerConfig};
use docqueue_db::DocumentStore;
use tokio::sync::broadcast;

use crate::{Job, JobHandler, JobOptions, QueueError, Worker};

const EVENT_CAPACITY: usize = 1024;

type Watchers = HashMap<JobId, Vec<Weak<Emitter<JobEvent>>>>;

struct QueueInner<S> {
    store: Arc<S>,
    index: String,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<JobEvent>,
    watchers: Mutex<Watchers>,
}

/// Store, index name, clock and event hub for a set of jobs and workers.
///
/// Cheap to clone; clones share the same hub.
pub struct Queue<S> {
    inner: Arc<QueueInner<S>>,
}

impl<S> Clone for Queue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: DocumentStore> Queue<S> {
    pub fn new(store: Arc<S>, index: impl Into<String>) -> Self {
        Self::with_clock(store, index, Arc::new(SystemClock))
    }

    /// Build a queue whose timestamps and expirations come from `clock`.
    pub fn with_clock(store: Arc<S>, index: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                store,
                index: index.into(),
                clock,
                event_tx,
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn index(&self) -> &str {
        &self.inner.index
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Enqueue a job with the default timeout.
    pub async fn add_job(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<Job<S>, QueueError> {
        Job::create(self, job_type, payload, JobOptions::default()).await
    }

    pub async fn add_job_with(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Job<S>, QueueError> {
        Job::create(self, job_type, payload, options).await
    }

    /// Load an existing job.
    pub async fn get_job(&self, job_type: &str, id: &JobId) -> Result<Job<S>, QueueError> {
        Job::fetch(self, job_type, id).await
    }

    /// Spawn a worker polling for `job_type`.
    pub async fn worker<H: JobHandler>(
        &self,
        job_type: &str,
        handler: H,
        config: WorkerConfig,
    ) -> Result<Worker, QueueError> {
        Worker::spawn(self, job_type, handler, config).await
    }

    /// Every event produced through this queue from now on.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Forward events about `id` to `emitter` until the returned guard drops.
    pub(crate) fn watch(&self, id: &JobId, emitter: Arc<Emitter<JobEvent>>) -> Watch<S> {
        self.lock_watchers()
            .entry(id.clone())
            .or_default()
            .push(Arc::downgrade(&emitter));
        Watch {
            queue: self.clone(),
            id: id.clone(),
            emitter,
        }
    }

    /// Broadcast an event and deliver it to the emitters watching its job.
    pub(crate) fn publish(&self, event: JobEvent) {
        if let Some(id) = event.job_id() {
            let live: Vec<Arc<Emitter<JobEvent>>> = {
                let mut watchers = self.lock_watchers();
                let live = match watchers.get_mut(id) {
                    Some(emitters) => {
                        emitters.retain(|weak| weak.strong_count() > 0);
                        emitters.iter().filter_map(Weak::upgrade).collect()
                    }
                    None => Vec::new(),
                };
                if live.is_empty() {
                    watchers.remove(id);
                }
                live
            };
            for emitter in live {
                emitter.emit(&event);
            }
        }

        // No receivers is fine
        let _ = self.inner.event_tx.send(event);
    }
}

impl<S> Queue<S> {
    fn unwatch(&self, id: &JobId, emitter: &Arc<Emitter<JobEvent>>) {
        let mut watchers = self.lock_watchers();
        if let Some(emitters) = watchers.get_mut(id) {
            emitters.retain(|weak| {
                weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(emitter))
            });
            if emitters.is_empty() {
                watchers.remove(id);
            }
        }
    }

    /// Jobs with at least one live handle in this process.
    #[cfg(test)]
    pub(crate) fn watched_jobs(&self) -> usize {
        self.lock_watchers().len()
    }

    fn lock_watchers(&self) -> std::sync::MutexGuard<'_, Watchers> {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A job handle's registration with its queue; removed on drop.
pub(crate) struct Watch<S> {
    queue: Queue<S>,
    id: JobId,
    emitter: Arc<Emitter<JobEvent>>,
}

impl<S> Watch<S> {
    pub(crate) fn emitter(&self) -> &Emitter<JobEvent> {
        &self.emitter
    }
}

impl<S> Drop for Watch<S> {
    fn drop(&mut self) {
        self.queue.unwatch(&self.id, &self.emitter);
    }
}

impl<S> std::fmt::Debug for Queue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("index", &self.inner.index)
            .finish_non_exhaustive()
    }
}
