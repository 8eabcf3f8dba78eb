use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;

/// Misuse of the stage timer. Always fatal for the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    /// `start` was called for a stage whose previous start has not been
    /// stopped yet.
    #[error("stage `{0}` started before the previous start was stopped")]
    AlreadyStarted(String),

    /// `stop` was called for a stage with no unmatched start.
    #[error("stage `{0}` stopped without a matching start")]
    NotStarted(String),

    /// A stage was read while a start is still pending.
    #[error("stage `{0}` read while still running")]
    StillRunning(String),

    /// An average was requested for a stage with zero recorded samples.
    #[error("stage `{0}` has no recorded samples")]
    EmptyStage(String),
}

/// Records named stage durations for one in-flight request.
///
/// A stage may be started and stopped any number of times over the request's
/// lifetime (loops record one sample per start/stop pair), but at most one
/// start may be pending per stage at a time. Different stages are fully
/// independent, so stage `a` may open and close while stage `b` is open.
///
/// Durations are wall-clock seconds measured with [`Instant`].
#[derive(Debug, Default)]
pub struct InferenceTimer {
    pending: HashMap<String, Instant>,
    samples: HashMap<String, Vec<f64>>,
}

impl InferenceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stage that has been started at least once.
    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self
            .samples
            .keys()
            .chain(self.pending.keys())
            .cloned()
            .collect();
        stages.sort();
        stages.dedup();
        stages
    }

    /// Whether the stage has been started at least once.
    pub fn has_stage(&self, stage: &str) -> bool {
        self.samples.contains_key(stage) || self.pending.contains_key(stage)
    }

    /// Opens a timing span for `stage`.
    pub fn start(&mut self, stage: &str) -> Result<(), TimerError> {
        if self.pending.contains_key(stage) {
            return Err(TimerError::AlreadyStarted(stage.to_string()));
        }
        self.pending.insert(stage.to_string(), Instant::now());
        Ok(())
    }

    /// Closes the pending span for `stage`, recording one sample.
    pub fn stop(&mut self, stage: &str) -> Result<(), TimerError> {
        let started = self
            .pending
            .remove(stage)
            .ok_or_else(|| TimerError::NotStarted(stage.to_string()))?;
        self.samples
            .entry(stage.to_string())
            .or_default()
            .push(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Records an externally measured sample for `stage`.
    ///
    /// Used when merging another timer's recorded durations into this one.
    pub fn record(&mut self, stage: &str, seconds: f64) {
        self.samples
            .entry(stage.to_string())
            .or_default()
            .push(seconds);
    }

    /// All recorded samples for `stage`, in recording order.
    ///
    /// Fails if the stage was never started or a start is still pending,
    /// since the sample list would be incomplete.
    pub fn stage_times(&self, stage: &str) -> Result<&[f64], TimerError> {
        if self.pending.contains_key(stage) {
            return Err(TimerError::StillRunning(stage.to_string()));
        }
        self.samples
            .get(stage)
            .map(Vec::as_slice)
            .ok_or_else(|| TimerError::NotStarted(stage.to_string()))
    }

    /// The mean of all recorded samples for `stage`.
    ///
    /// Division by an empty sample list is an error, never zero; callers
    /// that may race a stage should check [`InferenceTimer::has_stage`]
    /// first.
    pub fn stage_average(&self, stage: &str) -> Result<f64, TimerError> {
        let times = self.stage_times(stage)?;
        if times.is_empty() {
            return Err(TimerError::EmptyStage(stage.to_string()));
        }
        Ok(times.iter().sum::<f64>() / times.len() as f64)
    }

    /// Every completed stage's raw samples, keyed by stage name.
    ///
    /// Stages with a pending start are skipped; a snapshot is always
    /// internally consistent.
    pub fn all_times(&self) -> HashMap<String, Vec<f64>> {
        self.samples
            .iter()
            .filter(|(stage, _)| !self.pending.contains_key(*stage))
            .map(|(stage, times)| (stage.clone(), times.clone()))
            .collect()
    }

    /// Discards every pending start and every recorded sample.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.samples.clear();
    }
}
