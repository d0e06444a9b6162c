//! Worker actor for polling and executing jobs.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use docqueue_core::{Emitter, JobEvent, ListenerId, ValidationError, WorkerConfig, validate_job_type};
use docqueue_db::DocumentStore;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use ulid::Ulid;

use crate::messages::{WorkerMessage, WorkerStats};
use crate::protocol::{PollReport, Poller};
use crate::{JobHandler, Queue, QueueError};

/// Process-unique worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Ulid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flags shared between the worker handle, its actor and its ticker.
#[derive(Debug, Default)]
struct WorkerFlags {
    stopping: AtomicBool,
    /// A `Poll` has been sent and not yet picked up.
    tick_pending: AtomicBool,
}

impl WorkerStats {
    fn absorb(&mut self, report: &PollReport) {
        let count = |n: usize| u64::try_from(n).unwrap_or(u64::MAX);
        self.cycles += 1;
        self.fetched += count(report.fetched);
        self.claimed += count(report.claimed);
        self.conflicts += count(report.conflicts);
        self.completed += count(report.completed);
        self.failed += count(report.failed);
        self.stale += count(report.stale);
        self.errors += count(report.errors);
    }
}

/// State for the worker actor.
struct WorkerState<S: DocumentStore> {
    poller: Poller<S>,
    flags: Arc<WorkerFlags>,
    ticker: Option<JoinHandle<()>>,
    stats: WorkerStats,
}

/// Worker actor arguments.
struct WorkerArgs<S: DocumentStore> {
    poller: Poller<S>,
    flags: Arc<WorkerFlags>,
}

/// Worker actor that runs one poll cycle per `Poll` message.
struct WorkerActor<S>(PhantomData<fn() -> S>);

impl<S: DocumentStore> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerState<S>;
    type Arguments = WorkerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let WorkerArgs { poller, flags } = args;
        tracing::info!(
            worker_id = %poller.worker_id,
            job_type = %poller.job_type,
            interval_ms = poller.config.interval,
            size = poller.config.size,
            "Starting worker"
        );

        // Arm the ticker; the first poll happens one full interval from now
        let ticker = tokio::spawn(run_ticker(myself, flags.clone(), poller.config.interval()));

        poller.emit(JobEvent::WorkerStarted {
            worker_id: poller.worker_id.to_string(),
            job_type: poller.job_type.clone(),
            timestamp: poller.queue.now(),
        });

        Ok(WorkerState {
            poller,
            flags,
            ticker: Some(ticker),
            stats: WorkerStats::default(),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                state.flags.tick_pending.store(false, Ordering::Release);
                if state.flags.stopping.load(Ordering::Acquire) {
                    return Ok(());
                }

                let report = state.poller.poll_once().await;
                state.stats.absorb(&report);
                if report != PollReport::default() {
                    tracing::debug!(worker_id = %state.poller.worker_id, ?report, "Poll cycle finished");
                }
            }

            WorkerMessage::Stats { reply } => {
                let _ = reply.send(state.stats);
            }

            WorkerMessage::Stop => {
                tracing::info!(worker_id = %state.poller.worker_id, "Stopping worker");
                state.flags.stopping.store(true, Ordering::Release);
                if let Some(ticker) = state.ticker.take() {
                    ticker.abort();
                }
                state.poller.emit(JobEvent::WorkerStopped {
                    worker_id: state.poller.worker_id.to_string(),
                    timestamp: state.poller.queue.now(),
                });
                myself.stop(None);
            }
        }

        Ok(())
    }
}

async fn run_ticker(actor: ActorRef<WorkerMessage>, flags: Arc<WorkerFlags>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if flags.stopping.load(Ordering::Acquire) {
            break;
        }
        // The previous tick is still queued behind a slow cycle
        if flags.tick_pending.swap(true, Ordering::AcqRel) {
            continue;
        }
        if actor.send_message(WorkerMessage::Poll).is_err() {
            break;
        }
    }
}

/// Handle on a running worker.
///
/// Dropping the handle stops the worker without waiting; [`Worker::stop`]
/// lets the current cycle finish first.
pub struct Worker {
    id: WorkerId,
    job_type: String,
    actor: ActorRef<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    flags: Arc<WorkerFlags>,
    emitter: Arc<Emitter<JobEvent>>,
}

impl Worker {
    pub fn builder<S: DocumentStore>(queue: &Queue<S>) -> WorkerBuilder<S> {
        WorkerBuilder {
            queue: queue.clone(),
            job_type: None,
            handler: None,
            config: WorkerConfig::default(),
        }
    }

    /// Validate the arguments and start polling for `job_type`.
    ///
    /// Nothing touches the store until the first tick, one `interval` later.
    pub async fn spawn<S: DocumentStore, H: JobHandler>(
        queue: &Queue<S>,
        job_type: &str,
        handler: H,
        config: WorkerConfig,
    ) -> Result<Self, QueueError> {
        Self::builder(queue)
            .job_type(job_type)
            .handler(handler)
            .config(config)
            .spawn()
            .await
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn is_running(&self) -> bool {
        !self.flags.stopping.load(Ordering::Acquire)
    }

    /// Listen to events produced by this worker.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.emitter.unsubscribe(id)
    }

    /// Counters since start. Waits for an in-flight cycle to finish.
    pub async fn stats(&self) -> Result<WorkerStats, QueueError> {
        match ractor::rpc::call(&self.actor, |reply| WorkerMessage::Stats { reply }, None).await {
            Ok(CallResult::Success(stats)) => Ok(stats),
            Ok(CallResult::Timeout) => Err(QueueError::Actor("stats request timed out".into())),
            Ok(CallResult::SenderError) => Err(QueueError::Actor("worker is not running".into())),
            Err(e) => Err(QueueError::Actor(e.to_string())),
        }
    }

    /// Stop polling, let the in-flight cycle finish, then wait for the actor
    /// to exit.
    pub async fn stop(mut self) -> Result<(), QueueError> {
        self.flags.stopping.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // Queued behind any running cycle
        if self.actor.send_message(WorkerMessage::Stop).is_err() {
            tracing::debug!(worker_id = %self.id, "Worker already stopped");
        }

        handle
            .await
            .map_err(|e| QueueError::Actor(format!("Worker task failed: {}", e)))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.flags.stopping.store(true, Ordering::Release);
            self.actor.stop(None);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for [`Worker`].
pub struct WorkerBuilder<S: DocumentStore> {
    queue: Queue<S>,
    job_type: Option<String>,
    handler: Option<Arc<dyn JobHandler>>,
    config: WorkerConfig,
}

impl<S: DocumentStore> WorkerBuilder<S> {
    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn handler<H: JobHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_interval(interval);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.config = self.config.with_size(size);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config = self.config.with_max_attempts(max_attempts);
        self
    }

    /// Validate and start the worker.
    pub async fn spawn(self) -> Result<Worker, QueueError> {
        let job_type = self.job_type.ok_or(ValidationError::InvalidType)?;
        validate_job_type(&job_type)?;
        let handler = self.handler.ok_or(ValidationError::MissingHandler)?;
        self.config.validate()?;

        let id = WorkerId::new();
        let emitter = Arc::new(Emitter::new());
        let flags = Arc::new(WorkerFlags::default());

        let poller = Poller {
            queue: self.queue,
            worker_id: id,
            job_type: job_type.clone(),
            config: self.config,
            handler,
            emitter: emitter.clone(),
        };

        let (actor, handle) = Actor::spawn(
            Some(format!("worker-{}", id)),
            WorkerActor::<S>(PhantomData),
            WorkerArgs {
                poller,
                flags: flags.clone(),
            },
        )
        .await
        .map_err(|e| QueueError::Actor(format!("Failed to spawn worker: {}", e)))?;

        Ok(Worker {
            id,
            job_type,
            actor,
            handle: Some(handle),
            flags,
            emitter,
        })
    }
}
