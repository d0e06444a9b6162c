//! Search, claim and finalize: the steps of one poll cycle.
//!
//! Each step is a single store call. Claims and finalizes are conditioned on
//! a version the caller observed, so two writers racing on the same document
//! produce exactly one winner and one [`ClaimOutcome::Conflict`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docqueue_core::{
    ClaimPatch, Emitter, FinishPatch, JobDocument, JobEvent, JobId, JobStatus, WorkerConfig,
    timestamp,
};
use docqueue_db::{DocumentStore, Filter, SearchQuery, StoredDocument, Version};
use futures_util::FutureExt;

use crate::job::decode;
use crate::{ClaimedJob, JobHandler, Queue, QueueError, WorkerId};

/// Failure reason recorded when a job hits the attempt ceiling.
pub const MAX_ATTEMPTS_REACHED: &str = "max attempts reached";

/// Pending jobs, plus processing jobs whose claim lapsed before `now`,
/// oldest first.
pub fn claimable_query(now: DateTime<Utc>) -> SearchQuery {
    SearchQuery::filtered(Filter::or([
        Filter::eq("status", JobStatus::PENDING),
        Filter::and([
            Filter::eq("status", JobStatus::PROCESSING),
            Filter::lt("process_expiration", timestamp::format(&now)),
        ]),
    ]))
    .sort_asc("created")
}

/// Fetch up to `size` claimable documents of `job_type`.
pub async fn search_candidates<S: DocumentStore>(
    store: &S,
    index: &str,
    job_type: &str,
    now: DateTime<Utc>,
    size: usize,
) -> Result<Vec<StoredDocument>, QueueError> {
    Ok(store
        .search(index, job_type, &claimable_query(now), size)
        .await?)
}

/// A search hit decoded into a job document.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: JobId,
    /// Version the document was read at; the claim is conditioned on it.
    pub version: Version,
    pub document: JobDocument,
}

impl Candidate {
    pub fn decode(stored: StoredDocument) -> Result<Self, QueueError> {
        let id = JobId::new(stored.id.clone());
        let (version, document) = decode(stored)?;
        Ok(Self {
            id,
            version,
            document,
        })
    }
}

/// A won claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub id: JobId,
    /// Version written by the claim; the finalize is conditioned on it.
    pub version: Version,
    pub attempts: u32,
    pub claimed_at: DateTime<Utc>,
    pub process_expiration: DateTime<Utc>,
    /// The job was taken over from a lapsed claim.
    pub reclaimed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Claim),
    /// Another writer changed the document since it was read.
    Conflict,
}

/// Try to take ownership of `candidate` at `now`.
///
/// Issues one update conditioned on `candidate.version` that bumps
/// `attempts`, sets `status` to processing and `process_expiration` to
/// `now` plus the job's timeout (or `default_timeout_ms`).
pub async fn claim_job<S: DocumentStore>(
    store: &S,
    index: &str,
    job_type: &str,
    candidate: &Candidate,
    now: DateTime<Utc>,
    default_timeout_ms: u64,
) -> Result<ClaimOutcome, QueueError> {
    let patch = ClaimPatch::for_document(&candidate.document, now, default_timeout_ms);
    let body = serde_json::to_value(&patch)?;

    match store
        .update(index, job_type, candidate.id.as_str(), candidate.version, body)
        .await
    {
        Ok(version) => Ok(ClaimOutcome::Claimed(Claim {
            id: candidate.id.clone(),
            version,
            attempts: patch.attempts,
            claimed_at: now,
            process_expiration: patch.process_expiration,
            reclaimed: candidate.document.status == JobStatus::Processing,
        })),
        Err(e) if e.is_conflict() => Ok(ClaimOutcome::Conflict),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Recorded(Version),
    /// The document moved on since `expected`; nothing was written.
    Stale,
}

/// Record a terminal status if the document is still at `expected`.
pub async fn finalize<S: DocumentStore>(
    store: &S,
    index: &str,
    job_type: &str,
    id: &JobId,
    expected: Version,
    patch: &FinishPatch,
) -> Result<FinalizeOutcome, QueueError> {
    let body = serde_json::to_value(patch)?;
    match store
        .update(index, job_type, id.as_str(), expected, body)
        .await
    {
        Ok(version) => Ok(FinalizeOutcome::Recorded(version)),
        Err(e) if e.is_conflict() => Ok(FinalizeOutcome::Stale),
        Err(e) => Err(e.into()),
    }
}

/// What happened during one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub claimed: usize,
    pub conflicts: usize,
    /// Hits that were no longer claimable when inspected.
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub stale: usize,
    pub errors: usize,
}

enum Outcome {
    Skipped,
    Conflict,
    Completed,
    Failed,
    Exhausted,
    Stale,
}

impl PollReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::Conflict => self.conflicts += 1,
            Outcome::Completed => {
                self.claimed += 1;
                self.completed += 1;
            }
            Outcome::Failed => {
                self.claimed += 1;
                self.failed += 1;
            }
            Outcome::Exhausted => self.failed += 1,
            Outcome::Stale => {
                self.claimed += 1;
                self.stale += 1;
            }
        }
    }
}

/// Runs poll cycles for one worker.
pub(crate) struct Poller<S: DocumentStore> {
    pub(crate) queue: Queue<S>,
    pub(crate) worker_id: WorkerId,
    pub(crate) job_type: String,
    pub(crate) config: WorkerConfig,
    pub(crate) handler: Arc<dyn JobHandler>,
    pub(crate) emitter: Arc<Emitter<JobEvent>>,
}

impl<S: DocumentStore> Poller<S> {
    pub(crate) fn emit(&self, event: JobEvent) {
        self.emitter.emit(&event);
        self.queue.publish(event);
    }

    /// Search once and work through the batch in order.
    ///
    /// Store faults are logged and counted; they never escape, so the caller's
    /// loop keeps running.
    pub(crate) async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();
        let now = self.queue.now();

        let batch = match search_candidates(
            self.queue.store().as_ref(),
            self.queue.index(),
            &self.job_type,
            now,
            self.config.size,
        )
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_type = %self.job_type,
                    error = %e,
                    "Poll failed"
                );
                report.errors += 1;
                self.emit(JobEvent::PollFailed {
                    worker_id: self.worker_id.to_string(),
                    error: e.to_string(),
                    timestamp: now,
                });
                return report;
            }
        };

        report.fetched = batch.len();
        for stored in batch {
            let job_id = stored.id.clone();
            match self.process(stored, now).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        job_id = %job_id,
                        error = %e,
                        "Failed to process candidate"
                    );
                    report.errors += 1;
                }
            }
        }

        report
    }

    async fn process(
        &self,
        stored: StoredDocument,
        polled_at: DateTime<Utc>,
    ) -> Result<Outcome, QueueError> {
        let candidate = Candidate::decode(stored)?;

        if !candidate.document.is_claimable(polled_at) {
            tracing::debug!(job_id = %candidate.id, status = %candidate.document.status, "Skipping unclaimable job");
            return Ok(Outcome::Skipped);
        }

        if let Some(max_attempts) = self.config.max_attempts
            && candidate.document.attempts >= max_attempts
        {
            return self.exhaust(&candidate).await;
        }

        let store = self.queue.store().as_ref();
        let index = self.queue.index();
        let now = self.queue.now();

        let claim = match claim_job(store, index, &self.job_type, &candidate, now, self.config.timeout)
            .await?
        {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::Conflict => {
                tracing::debug!(
                    worker_id = %self.worker_id,
                    job_id = %candidate.id,
                    version = %candidate.version,
                    "Claim lost to another worker"
                );
                return Ok(Outcome::Conflict);
            }
        };

        tracing::info!(
            worker_id = %self.worker_id,
            job_id = %claim.id,
            attempts = claim.attempts,
            reclaimed = claim.reclaimed,
            "Job claimed"
        );
        self.emit(JobEvent::JobClaimed {
            job_id: claim.id.clone(),
            worker_id: self.worker_id.to_string(),
            attempts: claim.attempts,
            reclaimed: claim.reclaimed,
            process_expiration: claim.process_expiration,
            timestamp: now,
        });

        let job = ClaimedJob {
            id: claim.id.clone(),
            job_type: self.job_type.clone(),
            payload: candidate.document.payload,
            attempts: claim.attempts,
            worker_id: self.worker_id,
            process_expiration: claim.process_expiration,
        };
        let result = AssertUnwindSafe(async { self.handler.handle(job).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(format!("handler panicked: {}", panic_message(&*panic))));

        let finished = self.queue.now();
        let patch = match &result {
            Ok(_) => FinishPatch::completed(finished),
            Err(_) => FinishPatch::failed(finished),
        };

        match finalize(store, index, &self.job_type, &claim.id, claim.version, &patch).await? {
            FinalizeOutcome::Stale => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %claim.id,
                    "Job was reclaimed before it finished; discarding result"
                );
                Ok(Outcome::Stale)
            }
            FinalizeOutcome::Recorded(_) => match result {
                Ok(output) => {
                    let duration_ms = u64::try_from((finished - claim.claimed_at).num_milliseconds())
                        .unwrap_or(0);
                    tracing::info!(worker_id = %self.worker_id, job_id = %claim.id, duration_ms, "Job completed");
                    self.emit(JobEvent::JobCompleted {
                        job_id: claim.id,
                        worker_id: self.worker_id.to_string(),
                        output,
                        duration_ms,
                        timestamp: finished,
                    });
                    Ok(Outcome::Completed)
                }
                Err(error) => {
                    tracing::warn!(worker_id = %self.worker_id, job_id = %claim.id, error = %error, "Job failed");
                    self.emit(JobEvent::JobFailed {
                        job_id: claim.id,
                        worker_id: self.worker_id.to_string(),
                        error,
                        attempts: claim.attempts,
                        timestamp: finished,
                    });
                    Ok(Outcome::Failed)
                }
            },
        }
    }

    /// Fail a job that already used up its attempts instead of claiming it.
    async fn exhaust(&self, candidate: &Candidate) -> Result<Outcome, QueueError> {
        let now = self.queue.now();
        let patch = FinishPatch::failed(now);

        match finalize(
            self.queue.store().as_ref(),
            self.queue.index(),
            &self.job_type,
            &candidate.id,
            candidate.version,
            &patch,
        )
        .await?
        {
            FinalizeOutcome::Stale => Ok(Outcome::Conflict),
            FinalizeOutcome::Recorded(_) => {
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %candidate.id,
                    attempts = candidate.document.attempts,
                    "Job reached its attempt ceiling"
                );
                self.emit(JobEvent::JobFailed {
                    job_id: candidate.id.clone(),
                    worker_id: self.worker_id.to_string(),
                    error: MAX_ATTEMPTS_REACHED.to_string(),
                    attempts: candidate.document.attempts,
                    timestamp: now,
                });
                Ok(Outcome::Exhausted)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
