//! # Per-Request State
//!
//! [`InferenceState`] is the mutable context threaded through every operator
//! call of one pipeline request. It owns the request's stage timer and an
//! arbitrary key/value store that operators and middleware may use to pass
//! data the payload schema does not carry (accumulated partial results,
//! counters, annotations).
//!
//! The handle is cheap to clone; clones share the same underlying state, so
//! it can cross task boundaries when a scheduler runs the operator on a
//! worker.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::timing::{InferenceTimer, TimerError};

#[derive(Debug, Default)]
struct StateInner {
    timer: InferenceTimer,
    extras: HashMap<String, Value>,
}

/// Shared per-request context: stage timer plus arbitrary key/value extras.
///
/// Created by the pipeline at request start and discarded at request end,
/// unless the caller retains it (or its timing snapshot) for diagnostics.
#[derive(Debug, Clone)]
pub struct InferenceState {
    id: Uuid,
    inner: Arc<Mutex<StateInner>>,
}

impl Default for InferenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(StateInner::default())),
        }
    }

    /// Unique id of the request this state belongs to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Opens a named timing stage.
    pub async fn start_timing(&self, stage: &str) -> Result<(), TimerError> {
        self.inner.lock().await.timer.start(stage)
    }

    /// Closes a named timing stage, recording one sample.
    pub async fn stop_timing(&self, stage: &str) -> Result<(), TimerError> {
        self.inner.lock().await.timer.stop(stage)
    }

    /// Whether the stage was ever started on this request.
    pub async fn has_stage(&self, stage: &str) -> bool {
        self.inner.lock().await.timer.has_stage(stage)
    }

    /// Mean duration of a completed stage.
    pub async fn stage_average(&self, stage: &str) -> Result<f64, TimerError> {
        self.inner.lock().await.timer.stage_average(stage)
    }

    /// Records an externally measured sample, e.g. a batched stage's shared
    /// duration being attributed to each request in the batch.
    pub async fn record_timing(&self, stage: &str, seconds: f64) {
        self.inner.lock().await.timer.record(stage, seconds);
    }

    /// Every completed stage's raw samples, for export or diagnostics.
    pub async fn timing_snapshot(&self) -> HashMap<String, Vec<f64>> {
        self.inner.lock().await.timer.all_times()
    }

    /// Attaches an arbitrary value to the request.
    pub async fn insert(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().await.extras.insert(key.into(), value);
    }

    /// Reads back an attached value.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.extras.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn clones_share_state() {
        let state = InferenceState::new();
        let clone = state.clone();

        clone.insert("partial", json!([1, 2])).await;
        assert_eq!(state.get("partial").await, Some(json!([1, 2])));
        assert_eq!(state.id(), clone.id());
    }

    #[tokio::test]
    async fn timing_round_trip() {
        let state = InferenceState::new();
        state.start_timing("stage").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        state.stop_timing("stage").await.unwrap();

        let snapshot = state.timing_snapshot().await;
        assert_eq!(snapshot["stage"].len(), 1);
        assert!(state.stage_average("stage").await.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn misuse_surfaces_timer_error() {
        let state = InferenceState::new();
        assert_eq!(
            state.stop_timing("never").await,
            Err(TimerError::NotStarted("never".to_string()))
        );
    }
}
