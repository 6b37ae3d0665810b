//! Queued admission: a FIFO job table drained by exactly one worker.
//!
//! ## Components
//!
//! - `JobQueue`: admits jobs, answers status queries, recovers after restart
//! - `Worker`: runs one job at a time through the pipeline, then cools down
//! - `QueueSnapshot`: the persisted form of the queue and the activity ledger

pub mod queue;
pub mod types;
pub mod worker;

pub use queue::JobQueue;
pub use types::{
    ClientStatus, GlobalStatus, JobOutcome, JobStatusView, QueueActivity, QueueConfig,
    QueueSnapshot,
};
pub use worker::{Worker, WorkerHandle};
