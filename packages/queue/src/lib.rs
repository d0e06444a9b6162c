//! Durable job queue over a versioned document store.
//!
//! Producers index job documents through a [`Queue`]. Each [`Worker`] is a
//! ractor actor fed by a ticker: on every tick it searches for pending jobs
//! (and processing jobs whose claim has lapsed), claims them one at a time
//! with a version-conditioned update, runs its handler and records the
//! outcome with a second conditioned update. Workers share nothing; the
//! store's conditional write is the only lock.
//!
//! # Usage
//!
//! ```ignore
//! use docqueue::{Queue, WorkerConfig};
//! use docqueue_db::MemoryStore;
//! use std::sync::Arc;
//!
//! let queue = Queue::new(Arc::new(MemoryStore::new()), "jobs");
//! let job = queue.add_job("email", json!({"to": "a@b.c"})).await?;
//!
//! let worker = queue
//!     .worker("email", |job: ClaimedJob| async move { Ok(job.payload) }, WorkerConfig::default())
//!     .await?;
//! // ...
//! worker.stop().await?;
//! ```

mod error;
mod handler;
mod job;
mod messages;
pub mod protocol;
mod queue;
mod worker;

pub use error::QueueError;
pub use handler::{ClaimedJob, HandlerFuture, HandlerResult, JobHandler};
pub use job::{Job, JobOptions};
pub use messages::{WorkerMessage, WorkerStats};
pub use queue::Queue;
pub use worker::{Worker, WorkerBuilder, WorkerId};

pub use docqueue_core::{
    Clock, JobDocument, JobEvent, JobId, JobStatus, ListenerId, MAX_TIMEOUT_MS, ManualClock,
    SystemClock, ValidationError, WorkerConfig,
};
