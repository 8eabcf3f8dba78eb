use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot::Receiver;
use tokio::time::Sleep;

use crate::error::{ErrorKind, TimeoutKind};

/// The caller's completion handle for one batched submission.
///
/// Awaiting it yields the output slice corresponding to the submitted
/// input, or the failure the whole batch observed. A configured result
/// timeout bounds the wait: when it elapses first, the await fails with a
/// batch-wait timeout and the entry is marked cancelled. Dropping the
/// handle before completion marks the entry cancelled too; the worker
/// re-checks the flag at drain time and leaves cancelled entries out of
/// the batch.
#[derive(Debug)]
pub struct Item {
    receiver: Receiver<Result<Value, ErrorKind>>,
    cancelled: Arc<AtomicBool>,
    deadline: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl Item {
    pub(crate) fn new(
        receiver: Receiver<Result<Value, ErrorKind>>,
        cancelled: Arc<AtomicBool>,
        result_timeout: Option<Duration>,
    ) -> Self {
        Self {
            receiver,
            cancelled,
            deadline: result_timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout))),
            finished: false,
        }
    }

    /// Marks the entry cancelled without dropping the handle.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Future for Item {
    type Output = Result<Value, ErrorKind>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Pending => {}
            Poll::Ready(Ok(result)) => {
                this.finished = true;
                return Poll::Ready(result);
            }
            Poll::Ready(Err(_)) => {
                this.finished = true;
                return Poll::Ready(Err(ErrorKind::Scheduler(
                    "batching worker dropped the entry".to_string(),
                )));
            }
        }

        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                // Cancel so the worker skips the entry at drain time; a
                // result already in flight is simply discarded.
                this.cancelled.store(true, Ordering::SeqCst);
                this.finished = true;
                return Poll::Ready(Err(ErrorKind::Timeout(TimeoutKind::BatchWait)));
            }
        }

        Poll::Pending
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        if !self.finished {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}
