use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::oneshot::Sender;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::state::InferenceState;

/// One pending call into the batching worker.
///
/// Pairs the caller's input with the oneshot channel its [`super::Item`]
/// handle awaits, the arrival time the worker's `max_wait` deadline is
/// computed from, and the cancellation flag shared with the handle.
///
/// Every item that reaches the worker is resolved exactly once — with the
/// batched output slice, or with the batch's failure, or with a shutdown
/// error. An item whose handle was cancelled before draining is dropped
/// without entering the batch, so no compute is wasted on it.
pub(crate) struct QueueItem {
    id: Uuid,
    input: Value,
    state: InferenceState,
    sender: Sender<Result<Value, ErrorKind>>,
    arrived_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl QueueItem {
    pub fn new(
        input: Value,
        state: InferenceState,
        sender: Sender<Result<Value, ErrorKind>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            state,
            sender,
            arrived_at: Instant::now(),
            cancelled,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn state(&self) -> &InferenceState {
        &self.state
    }

    pub fn arrived_at(&self) -> Instant {
        self.arrived_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Delivers the caller's result. A closed channel means the caller went
    /// away after draining; the result is discarded.
    pub fn resolve(self, result: Result<Value, ErrorKind>) {
        if self.sender.send(result).is_err() {
            tracing::debug!(id = %self.id, "batch entry receiver dropped before delivery");
        }
    }
}
