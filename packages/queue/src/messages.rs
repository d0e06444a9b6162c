//! Message types for the worker actor.

use ractor::RpcReplyPort;

/// Messages for the worker actor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ticker fired: run one poll cycle.
    Poll,

    /// Report cumulative counters.
    Stats { reply: RpcReplyPort<WorkerStats> },

    /// Finish the current cycle and stop.
    Stop,
}

/// Cumulative counters of a worker since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Poll cycles run.
    pub cycles: u64,
    /// Candidates returned by searches.
    pub fetched: u64,
    /// Claims won.
    pub claimed: u64,
    /// Claims lost to another writer.
    pub conflicts: u64,
    pub completed: u64,
    pub failed: u64,
    /// Results discarded because the job was reclaimed meanwhile.
    pub stale: u64,
    /// Searches and candidates that failed on a store fault.
    pub errors: u64,
}
