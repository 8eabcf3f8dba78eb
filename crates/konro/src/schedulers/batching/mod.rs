//! # Continuous Batching
//!
//! Under concurrent load, many callers each want one item processed by the
//! same expensive operator. This module coalesces those calls: submissions
//! queue as [`QueueItem`]s, a dedicated worker per operator drains up to
//! `max_batch_size` of them, stacks the inputs along a leading array
//! dimension, invokes the operator exactly once, and splits the output back
//! to each caller's completion handle in FIFO order.
//!
//! The worker wakes on whichever comes first: the queue reaching
//! `max_batch_size`, the oldest still-queued entry aging past `max_wait`,
//! or shutdown. At most one batch is in flight at a time, which bounds
//! resource use and preserves fairness across callers. On shutdown the
//! worker runs no further batch; every entry still queued resolves with a
//! shutdown error.
//!
//! A failed batched invocation fails every entry in that batch identically;
//! the runtime cannot know which item caused the failure. Per-item isolation
//! would require error capture inside the operator itself.

mod batcher;
mod item;
mod queue_item;
mod worker;

pub use batcher::{AdmissionPolicy, BatchConfig, ContinuousBatchingScheduler};
pub use item::Item;
