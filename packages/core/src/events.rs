//! Event types emitted by jobs and workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JobId;

/// Lifecycle events of the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A job document was indexed.
    JobCreated {
        job_id: JobId,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker won the claim on a job.
    JobClaimed {
        job_id: JobId,
        worker_id: String,
        attempts: u32,
        /// True when the job was taken over from a lapsed claim.
        reclaimed: bool,
        process_expiration: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// The handler finished and the completion was recorded.
    JobCompleted {
        job_id: JobId,
        worker_id: String,
        output: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The handler failed, or the attempt ceiling was hit.
    JobFailed {
        job_id: JobId,
        worker_id: String,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker armed its polling loop.
    WorkerStarted {
        worker_id: String,
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A poll cycle could not reach the store.
    PollFailed {
        worker_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker stopped polling.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobCreated { timestamp, .. }
            | JobEvent::JobClaimed { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::WorkerStarted { timestamp, .. }
            | JobEvent::PollFailed { timestamp, .. }
            | JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::JobCreated { job_id, .. }
            | JobEvent::JobClaimed { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Get the worker ID associated with this event, if any.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            JobEvent::JobCreated { .. } => None,
            JobEvent::JobClaimed { worker_id, .. }
            | JobEvent::JobCompleted { worker_id, .. }
            | JobEvent::JobFailed { worker_id, .. }
            | JobEvent::WorkerStarted { worker_id, .. }
            | JobEvent::PollFailed { worker_id, .. }
            | JobEvent::WorkerStopped { worker_id, .. } => Some(worker_id),
        }
    }

    /// True for completion and failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. })
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobCreated {
                job_id, job_type, ..
            } => format!("Job {} ({}) created", job_id, job_type),
            JobEvent::JobClaimed {
                job_id,
                worker_id,
                attempts,
                reclaimed,
                ..
            } => {
                let reclaim = if *reclaimed { " after expiry" } else { "" };
                format!(
                    "Job {} claimed by {}{} (attempt {})",
                    job_id, worker_id, reclaim, attempts
                )
            }
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
            JobEvent::WorkerStarted {
                worker_id,
                job_type,
                ..
            } => format!("Worker {} polling for {}", worker_id, job_type),
            JobEvent::PollFailed {
                worker_id, error, ..
            } => format!("Worker {} poll failed: {}", worker_id, error),
            JobEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
        }
    }
}
