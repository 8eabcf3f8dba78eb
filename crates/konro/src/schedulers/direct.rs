use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::ErrorKind;
use crate::operator::Operator;
use crate::state::InferenceState;

/// Direct dispatch: one operator invocation per submission, executed on the
/// runtime behind a worker pool sized independently of caller concurrency.
///
/// The calling task suspends until its invocation completes or fails; the
/// semaphore bounds how many operator bodies run at once, so a burst of
/// callers queues on permits rather than oversubscribing the runtime.
pub struct OperatorScheduler {
    permits: Arc<Semaphore>,
}

impl OperatorScheduler {
    pub const DEFAULT_WORKERS: usize = 8;

    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs one operator invocation and waits for its result.
    pub async fn submit(
        &self,
        operator: Arc<dyn Operator>,
        input: Value,
        state: InferenceState,
    ) -> Result<Value, ErrorKind> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ErrorKind::Scheduler("worker pool is closed".to_string()))?;

        let worker = tokio::spawn(async move {
            let result = operator.run(input, &state).await;
            drop(permit);
            result
        });

        match worker.await {
            Ok(result) => result.map_err(ErrorKind::from),
            Err(join) => Err(ErrorKind::Scheduler(format!(
                "operator task did not complete: {join}"
            ))),
        }
    }
}

impl Default for OperatorScheduler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORKERS)
    }
}
