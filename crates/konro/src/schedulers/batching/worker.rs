use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Handle to the long-lived aggregation task behind a batching scheduler.
///
/// Owns the running flag the task polls and the notifier that wakes it on
/// enqueue. Dropping the handle initiates a graceful shutdown: the flag
/// flips, the task is woken so it can observe the flip, drain its queue,
/// and exit.
pub(crate) struct BatchWorkerHandle {
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl BatchWorkerHandle {
    /// Spawns the worker. The closure receives the shared running flag and
    /// notifier and must return the spawned task's join handle.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());
        Self {
            running,
            notifier,
            handle: Some(handle),
        }
    }

    /// Wakes the worker; called after every enqueue.
    pub fn notify(&self) {
        self.notifier.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flips the running flag and wakes the worker so it can drain and exit.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.await;
            });
        }
    }
}

impl Drop for BatchWorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
