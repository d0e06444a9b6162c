//! Job document layout and the job state machine.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ValidationError;
use crate::timestamp;

/// Store-assigned identifier of a job document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by a worker until `process_expiration`.
    Processing,
    /// Handler finished successfully.
    Completed,
    /// Handler failed, or the attempt ceiling was reached.
    Failed,
}

impl JobStatus {
    pub const PENDING: &'static str = "pending";
    pub const PROCESSING: &'static str = "processing";
    pub const COMPLETED: &'static str = "completed";
    pub const FAILED: &'static str = "failed";

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => Self::PENDING,
            JobStatus::Processing => Self::PROCESSING,
            JobStatus::Completed => Self::COMPLETED,
            JobStatus::Failed => Self::FAILED,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `processing -> processing` is the expiration reclaim path.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject empty or blank job types.
pub fn validate_job_type(job_type: &str) -> Result<(), ValidationError> {
    if job_type.trim().is_empty() {
        return Err(ValidationError::InvalidType);
    }
    Ok(())
}

/// Payloads must be JSON objects.
pub fn validate_payload(payload: &Value) -> Result<(), ValidationError> {
    let found = match payload {
        Value::Object(_) => return Ok(()),
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    };
    Err(ValidationError::InvalidPayload { found })
}

/// `at + millis`, clamped to the last instant the timestamp layout can hold.
fn add_millis(at: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    let latest = timestamp::latest();
    i64::try_from(millis)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .map_or(latest, |expires| expires.min(latest))
}

/// The persisted body of a job.
///
/// `id`, `type` and `version` are addressing metadata owned by the store and
/// are not part of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub payload: Value,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    pub status: JobStatus,
    /// Claim duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub process_expiration: Option<DateTime<Utc>>,
}

impl JobDocument {
    /// A fresh pending document.
    pub fn new(payload: Value, created: DateTime<Utc>, timeout_ms: u64) -> Self {
        Self {
            payload,
            created,
            started: None,
            completed: None,
            attempts: 0,
            status: JobStatus::Pending,
            timeout: Some(timeout_ms),
            process_expiration: None,
        }
    }

    /// The job's own timeout, falling back to `default_ms`.
    pub fn effective_timeout(&self, default_ms: u64) -> u64 {
        self.timeout.filter(|t| *t > 0).unwrap_or(default_ms)
    }

    /// Pending jobs and processing jobs whose claim lapsed before `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Processing => self.process_expiration.is_none_or(|at| at < now),
            status => status.can_transition_to(JobStatus::Processing),
        }
    }
}

/// Partial document written by a successful claim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimPatch {
    pub attempts: u32,
    pub status: JobStatus,
    #[serde(with = "timestamp")]
    pub process_expiration: DateTime<Utc>,
    #[serde(
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started: Option<DateTime<Utc>>,
}

impl ClaimPatch {
    /// Build the claim for `doc` at `now`; `default_timeout_ms` applies when
    /// the document carries no timeout of its own.
    pub fn for_document(doc: &JobDocument, now: DateTime<Utc>, default_timeout_ms: u64) -> Self {
        Self {
            attempts: doc.attempts.saturating_add(1),
            status: JobStatus::Processing,
            process_expiration: add_millis(now, doc.effective_timeout(default_timeout_ms)),
            started: doc.started.is_none().then_some(now),
        }
    }
}

/// Partial document written on a terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishPatch {
    pub status: JobStatus,
    #[serde(with = "timestamp")]
    pub completed: DateTime<Utc>,
}

impl FinishPatch {
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Completed,
            completed: at,
        }
    }

    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Failed,
            completed: at,
        }
    }
}
