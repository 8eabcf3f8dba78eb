use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::Instant;

use crate::error::{ErrorKind, TimeoutKind};
use crate::operator::Operator;
use crate::state::InferenceState;

use super::item::Item;
use super::queue_item::QueueItem;
use super::worker::BatchWorkerHandle;

/// What `submit` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Wait for space, up to the configured admission timeout.
    Block,
    /// Fail immediately with a queue-full error.
    Fail,
}

/// Tuning for one [`ContinuousBatchingScheduler`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Most entries drained into one batched invocation.
    pub max_batch_size: usize,

    /// Longest the oldest queued entry waits before a partial batch runs.
    pub max_wait: Duration,

    /// Queue capacity; submissions beyond it hit the admission policy.
    pub capacity: usize,

    /// Behavior at capacity.
    pub admission: AdmissionPolicy,

    /// Caller deadline for blocking admission.
    pub admission_timeout: Duration,

    /// Caller deadline for the batched result, measured from admission.
    /// When it elapses first the await fails with a batch-wait timeout and
    /// the entry is cancelled. `None` leaves the wait unbounded.
    pub result_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait: Duration::from_millis(50),
            capacity: 256,
            admission: AdmissionPolicy::Block,
            admission_timeout: Duration::from_secs(30),
            result_timeout: None,
        }
    }
}

/// Coalesces concurrent calls to one operator into batched invocations.
///
/// One instance serves one operator. Callers enqueue via
/// [`ContinuousBatchingScheduler::submit`] and await the returned [`Item`];
/// a dedicated worker drains the queue in FIFO order, runs the operator
/// once per batch, and resolves every drained entry exactly once. See the
/// module docs for the wake and failure semantics.
pub struct ContinuousBatchingScheduler {
    queue: Arc<Mutex<VecDeque<QueueItem>>>,
    space: Arc<Notify>,
    config: BatchConfig,
    handle: BatchWorkerHandle,
}

impl ContinuousBatchingScheduler {
    pub fn new(operator: Arc<dyn Operator>, config: BatchConfig) -> Self {
        let queue: Arc<Mutex<VecDeque<QueueItem>>> = Arc::new(Mutex::new(VecDeque::new()));
        let space = Arc::new(Notify::new());

        let handle = BatchWorkerHandle::new({
            let queue = queue.clone();
            let space = space.clone();
            let config = config.clone();
            move |running, notifier| {
                tokio::spawn(aggregation_loop(
                    operator, config, queue, space, running, notifier,
                ))
            }
        });

        Self {
            queue,
            space,
            config,
            handle,
        }
    }

    /// Enqueues one input and returns the handle its result arrives on.
    ///
    /// Applies the admission policy when the queue is at capacity; a
    /// blocked caller waits no longer than the configured admission
    /// timeout.
    pub async fn submit(&self, input: Value, state: InferenceState) -> Result<Item, ErrorKind> {
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut entry = Some(QueueItem::new(input, state, tx, cancelled.clone()));
        let deadline = Instant::now() + self.config.admission_timeout;

        loop {
            if !self.handle.is_running() {
                return Err(ErrorKind::Shutdown);
            }

            // Arm the space waiter before inspecting the queue, so a drain
            // between the capacity check and the wait cannot be missed.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.queue.lock().await;
                if queue.len() < self.config.capacity {
                    if let Some(entry) = entry.take() {
                        tracing::trace!(id = %entry.id(), depth = queue.len(), "enqueue");
                        queue.push_back(entry);
                    }
                    drop(queue);
                    self.handle.notify();
                    return Ok(Item::new(rx, cancelled, self.config.result_timeout));
                }
            }

            if self.config.admission == AdmissionPolicy::Fail {
                return Err(ErrorKind::QueueFull);
            }

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ErrorKind::Timeout(TimeoutKind::QueueAdmission))?;
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Err(ErrorKind::Timeout(TimeoutKind::QueueAdmission));
            }
        }
    }

    /// Entries currently waiting to be drained.
    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }
}

/// The dedicated per-operator aggregation task.
///
/// Single consumer: only this task dequeues, so drain order is enqueue
/// order and at most one batch is in flight at a time. Once shutdown is
/// signalled no further batch runs; every entry still queued resolves with
/// a shutdown error.
async fn aggregation_loop(
    operator: Arc<dyn Operator>,
    config: BatchConfig,
    queue: Arc<Mutex<VecDeque<QueueItem>>>,
    space: Arc<Notify>,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
) {
    'serve: loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let oldest_arrival = { queue.lock().await.front().map(QueueItem::arrived_at) };

        let Some(oldest_arrival) = oldest_arrival else {
            // Idle: wait for an enqueue or shutdown, both of which notify.
            notifier.notified().await;
            continue;
        };

        // Wait until the batch fills or the oldest entry ages out. Every
        // enqueue re-arms the wait via the notifier; no busy polling.
        let deadline = oldest_arrival + config.max_wait;
        loop {
            if !running.load(Ordering::SeqCst) {
                break 'serve;
            }
            let depth = queue.lock().await.len();
            if depth >= config.max_batch_size || Instant::now() >= deadline {
                break;
            }
            tokio::select! {
                _ = notifier.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }

        let drained = drain_batch(&queue, config.max_batch_size).await;
        space.notify_waiters();
        if drained.is_empty() {
            continue;
        }

        run_batch(operator.as_ref(), drained).await;
    }

    // Shutdown: every still-queued entry is resolved, never silently
    // dropped.
    let remaining = drain_batch(&queue, usize::MAX).await;
    space.notify_waiters();
    for entry in remaining {
        entry.resolve(Err(ErrorKind::Shutdown));
    }
}

/// Atomically moves up to `limit` entries out of the queue, oldest first.
/// Entries whose handle was cancelled while queued are dropped here, before
/// any compute is spent on them.
async fn drain_batch(queue: &Mutex<VecDeque<QueueItem>>, limit: usize) -> Vec<QueueItem> {
    let mut queue = queue.lock().await;
    let take = queue.len().min(limit);
    queue
        .drain(..take)
        .filter(|entry| !entry.is_cancelled())
        .collect()
}

/// Runs one batched invocation and resolves every drained entry.
async fn run_batch(operator: &dyn Operator, drained: Vec<QueueItem>) {
    let inputs: Vec<Value> = drained.iter().map(|entry| entry.input().clone()).collect();
    let size = inputs.len();
    tracing::debug!(operator = operator.name(), size, "running batch");

    // Entries reach the queue unchecked when the scheduler is driven
    // directly, so the contract is enforced on the stacked batch here. The
    // violation names the offending element; like any batch failure, every
    // entry observes it.
    if let Err(err) = operator.input_schema().validate_batch(&inputs) {
        tracing::warn!(operator = operator.name(), error = %err, "batch rejected");
        for entry in drained {
            entry.resolve(Err(ErrorKind::Validation(err.clone())));
        }
        return;
    }

    // The batched call shares one state; its recorded stages are attributed
    // to every request in the batch afterwards.
    let batch_state = InferenceState::new();
    let result = operator.run(Value::Array(inputs), &batch_state).await;

    match result {
        Ok(Value::Array(outputs)) if outputs.len() == size => {
            let samples = batch_state.timing_snapshot().await;
            for (entry, output) in drained.into_iter().zip(outputs) {
                for (stage, times) in &samples {
                    for time in times {
                        entry.state().record_timing(stage, *time).await;
                    }
                }
                entry.resolve(Ok(output));
            }
        }
        Ok(other) => {
            let shape = match &other {
                Value::Array(outputs) => format!("array of {}", outputs.len()),
                _ => "a non-array value".to_string(),
            };
            let message =
                format!("operator returned {shape} for a batch of {size}");
            tracing::warn!(operator = operator.name(), %message, "bad batch output");
            for entry in drained {
                entry.resolve(Err(ErrorKind::BatchExecution(message.clone())));
            }
        }
        Err(err) => {
            // Whole-batch failure: the runtime cannot attribute the error
            // to one item, so every entry observes it.
            let message = err.to_string();
            tracing::warn!(operator = operator.name(), %message, "batch failed");
            for entry in drained {
                entry.resolve(Err(ErrorKind::BatchExecution(message.clone())));
            }
        }
    }
}
