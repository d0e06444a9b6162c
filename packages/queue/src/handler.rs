//! Job handler trait.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use docqueue_core::JobId;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::WorkerId;

/// Result type for job handlers. The error string is recorded on the
/// `JobFailed` event.
pub type HandlerResult = Result<Value, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A job the worker has won the claim on, as handed to the handler.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    /// Attempt number of this claim, starting at 1.
    pub attempts: u32,
    pub worker_id: WorkerId,
    /// The claim is exclusive until this instant. Past it, another worker may
    /// take the job over.
    pub process_expiration: DateTime<Utc>,
}

impl ClaimedJob {
    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.payload.clone()).map_err(|e| e.to_string())
    }
}

/// Processes claimed jobs of one type.
///
/// Any `Fn(ClaimedJob) -> impl Future<Output = HandlerResult>` closure is a
/// handler.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: ClaimedJob) -> HandlerFuture;
}

impl<F, Fut> JobHandler for F
where
    F: Fn(ClaimedJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, job: ClaimedJob) -> HandlerFuture {
        Box::pin(self(job))
    }
}
