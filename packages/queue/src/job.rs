//! Producer-side handle on a job document.

use std::sync::Arc;
use std::time::Duration;

use docqueue_core::{
    DEFAULT_TIMEOUT_MS, Emitter, JobDocument, JobEvent, JobId, JobStatus, ListenerId,
    MAX_TIMEOUT_MS, ValidationError, validate_job_type, validate_payload,
};
use docqueue_db::{DocumentStore, StoredDocument, Version};
use serde::Serialize;
use serde_json::Value;

use crate::queue::Watch;
use crate::{Queue, QueueError};

/// Options for a new job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Claim duration in milliseconds, at most [`MAX_TIMEOUT_MS`]. Defaults
    /// to [`DEFAULT_TIMEOUT_MS`].
    pub timeout: Option<u64>,
}

impl JobOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn timeout_ms(&self) -> Result<u64, ValidationError> {
        match self.timeout {
            Some(0) => Err(ValidationError::InvalidTimeout),
            Some(timeout) if timeout > MAX_TIMEOUT_MS => Err(ValidationError::InvalidTimeout),
            Some(timeout) => Ok(timeout),
            None => Ok(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// A job as last seen by this process.
///
/// The store copy is canonical; call [`Job::refresh`] to re-read it. Events
/// that workers of the same [`Queue`] produce for this job are delivered to
/// its listeners while the handle (or a clone of it) is alive.
pub struct Job<S: DocumentStore> {
    queue: Queue<S>,
    id: JobId,
    job_type: String,
    version: Version,
    document: JobDocument,
    watch: Arc<Watch<S>>,
}

impl<S: DocumentStore> Job<S> {
    /// Validate and index a new pending job.
    ///
    /// Validation runs before the store is touched; on success exactly one
    /// `index` call is made.
    pub async fn create(
        queue: &Queue<S>,
        job_type: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<Self, QueueError> {
        validate_job_type(job_type)?;
        validate_payload(&payload)?;
        let timeout = options.timeout_ms()?;

        let document = JobDocument::new(payload, queue.now(), timeout);
        let body = serde_json::to_value(&document)?;

        let indexed = queue.store().index(queue.index(), job_type, body).await?;
        let id = JobId::from(indexed.id);

        tracing::debug!(job_id = %id, job_type, index = queue.index(), "Job created");

        let job = Self::attach(queue, job_type, id, indexed.version, document);
        queue.publish(JobEvent::JobCreated {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            timestamp: job.document.created,
        });
        Ok(job)
    }

    /// Serialize `payload` and create the job from it.
    pub async fn create_from<T: Serialize>(
        queue: &Queue<S>,
        job_type: &str,
        payload: &T,
        options: JobOptions,
    ) -> Result<Self, QueueError> {
        validate_job_type(job_type)?;
        let payload = serde_json::to_value(payload)?;
        Self::create(queue, job_type, payload, options).await
    }

    /// Load a job that already exists in the store.
    pub async fn fetch(queue: &Queue<S>, job_type: &str, id: &JobId) -> Result<Self, QueueError> {
        validate_job_type(job_type)?;
        let stored = queue.store().get(queue.index(), job_type, id.as_str()).await?;
        let (version, document) = decode(stored)?;
        Ok(Self::attach(queue, job_type, id.clone(), version, document))
    }

    fn attach(
        queue: &Queue<S>,
        job_type: &str,
        id: JobId,
        version: Version,
        document: JobDocument,
    ) -> Self {
        let watch = Arc::new(queue.watch(&id, Arc::new(Emitter::new())));
        Self {
            queue: queue.clone(),
            id,
            job_type: job_type.to_string(),
            version,
            document,
            watch,
        }
    }

    /// Re-read the document and version from the store.
    pub async fn refresh(&mut self) -> Result<&JobDocument, QueueError> {
        let stored = self
            .queue
            .store()
            .get(self.queue.index(), &self.job_type, self.id.as_str())
            .await?;
        let (version, document) = decode(stored)?;
        self.version = version;
        self.document = document;
        Ok(&self.document)
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn index(&self) -> &str {
        self.queue.index()
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn document(&self) -> &JobDocument {
        &self.document
    }

    pub fn status(&self) -> JobStatus {
        self.document.status
    }

    pub fn payload(&self) -> &Value {
        &self.document.payload
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.watch.emitter().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.watch.emitter().unsubscribe(id)
    }
}

impl<S: DocumentStore> Clone for Job<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            id: self.id.clone(),
            job_type: self.job_type.clone(),
            version: self.version,
            document: self.document.clone(),
            watch: self.watch.clone(),
        }
    }
}

impl<S: DocumentStore> std::fmt::Debug for Job<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("version", &self.version)
            .field("document", &self.document)
            .finish()
    }
}

pub(crate) fn decode(stored: StoredDocument) -> Result<(Version, JobDocument), QueueError> {
    let document = serde_json::from_value(stored.source).map_err(|source| QueueError::Decode {
        id: stored.id,
        source,
    })?;
    Ok((stored.version, document))
}
