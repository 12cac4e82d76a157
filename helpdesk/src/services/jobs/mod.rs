//! Outbound mail jobs on a persistent queue.
//!
//! A job is a `(name, JSON payload)` row in the `jobs` table. Workers claim
//! rows, run them under the retry policy's timeout and either complete,
//! reschedule or dead-letter them.

pub mod queue;
pub mod tasks;
pub mod worker;

pub use queue::{Job, JobQueue, QueueSignal, RetryPolicy};
pub use worker::{JobContext, WorkerPool};
