//! # Schedulers
//!
//! A scheduler executes one operator invocation on behalf of a request.
//!
//! * [`OperatorScheduler`] — direct dispatch: runs the operator on a
//!   bounded worker pool and hands the result straight back.
//!
//! * [`ContinuousBatchingScheduler`] — coalesces concurrently arriving
//!   calls targeting the same operator into one batched invocation,
//!   amortizing fixed per-call overhead under load.
//!
//! The pipeline binds one of the two to each stage at construction via
//! [`SchedulerChoice`].

mod batching;
mod direct;

pub use batching::{AdmissionPolicy, BatchConfig, ContinuousBatchingScheduler, Item};
pub use direct::OperatorScheduler;

/// Per-stage scheduler selection, made at pipeline construction.
#[derive(Debug, Clone)]
pub enum SchedulerChoice {
    /// Execute each call directly on the shared worker pool.
    Direct,
    /// Run the stage behind a dedicated continuous-batching worker.
    ContinuousBatching(BatchConfig),
}
