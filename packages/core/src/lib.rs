//! Core domain types for the document-backed job queue.
//!
//! This crate has no I/O. It holds the types shared by the store layer and
//! the worker runtime:
//! - `JobDocument` and `JobStatus`, the persisted job layout
//! - claim and finalize patches applied through conditional updates
//! - `WorkerConfig` and the process-wide defaults
//! - `JobEvent` and the `Emitter` observer registry
//! - a `Clock` seam so expiration math can run against a fixed time

mod clock;
mod config;
mod emitter;
mod error;
mod events;
mod job;
pub mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_INTERVAL_MS, DEFAULT_SIZE, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, WorkerConfig,
};
pub use emitter::{Emitter, ListenerId};
pub use error::ValidationError;
pub use events::JobEvent;
pub use job::{
    ClaimPatch, FinishPatch, JobDocument, JobId, JobStatus, validate_job_type, validate_payload,
};
