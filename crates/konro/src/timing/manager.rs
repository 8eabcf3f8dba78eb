use std::collections::HashMap;

use serde::Serialize;

use super::timer::{InferenceTimer, TimerError};

/// Serializable timing export for external metrics or logging collaborators:
/// per-stage averages alongside the full merged sample lists.
#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub times: HashMap<String, f64>,
    pub all_times: HashMap<String, Vec<f64>>,
}

/// Aggregates [`InferenceTimer`] results across repeated pipeline
/// invocations.
///
/// Two modes:
///
/// * **single inference** (default): one timer is reused across requests;
///   [`TimerManager::reset`] clears it in place.
/// * **multi inference**: each [`TimerManager::reset`] appends a fresh timer
///   and makes it current, keeping one timing record per request. Useful for
///   streaming generation, where one logical call issues many internal
///   steps.
///
/// Aggregation merges every tracked timer's raw samples for a stage before
/// averaging. Averaging per-run averages would weight runs with few samples
/// the same as runs with many, which is wrong for uneven sample counts.
///
/// The manager may be disabled, which turns every mutating call into a
/// no-op while leaving already recorded data readable.
#[derive(Debug)]
pub struct TimerManager {
    enabled: bool,
    multi_inference: bool,
    timers: Vec<InferenceTimer>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TimerManager {
    pub fn new(multi_inference: bool) -> Self {
        Self {
            enabled: true,
            multi_inference,
            timers: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn multi_inference(&self) -> bool {
        self.multi_inference
    }

    /// Prepares the manager for a new request.
    ///
    /// Single-inference mode clears the sole timer; multi-inference mode
    /// appends a fresh one and makes it current.
    pub fn reset(&mut self) {
        if !self.enabled {
            return;
        }
        self.ensure_current();
        if self.multi_inference {
            self.timers.push(InferenceTimer::new());
        } else if let Some(timer) = self.timers.first_mut() {
            timer.clear();
        }
    }

    /// The most recently appended timer, if any request has started.
    pub fn current(&mut self) -> Option<&mut InferenceTimer> {
        self.timers.last_mut()
    }

    /// Every tracked timing record, oldest first.
    pub fn inferences(&self) -> &[InferenceTimer] {
        &self.timers
    }

    /// Merges a finished request's samples into the current timer.
    pub fn record_all(&mut self, samples: &HashMap<String, Vec<f64>>) {
        if !self.enabled {
            return;
        }
        self.ensure_current();
        if let Some(timer) = self.timers.last_mut() {
            for (stage, times) in samples {
                for time in times {
                    timer.record(stage, *time);
                }
            }
        }
    }

    /// Every stage name seen by any tracked timer.
    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self
            .timers
            .iter()
            .flat_map(|timer| timer.stages())
            .collect();
        stages.sort();
        stages.dedup();
        stages
    }

    /// Stage name to every raw sample, merged across all tracked timers.
    pub fn all_times(&self) -> HashMap<String, Vec<f64>> {
        let mut merged: HashMap<String, Vec<f64>> = HashMap::new();
        for timer in &self.timers {
            for (stage, times) in timer.all_times() {
                merged.entry(stage).or_default().extend(times);
            }
        }
        merged
    }

    /// Stage name to the average over all merged raw samples.
    pub fn times(&self) -> Result<HashMap<String, f64>, TimerError> {
        let mut averages = HashMap::new();
        for (stage, times) in self.all_times() {
            if times.is_empty() {
                return Err(TimerError::EmptyStage(stage));
            }
            let average = times.iter().sum::<f64>() / times.len() as f64;
            averages.insert(stage, average);
        }
        Ok(averages)
    }

    /// Snapshot of averages and raw samples, ready to hand to a metrics or
    /// logging sink.
    pub fn summary(&self) -> Result<TimingSummary, TimerError> {
        Ok(TimingSummary {
            times: self.times()?,
            all_times: self.all_times(),
        })
    }

    fn ensure_current(&mut self) {
        if self.timers.is_empty() {
            self.timers.push(InferenceTimer::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(stage: &str, values: &[f64]) -> HashMap<String, Vec<f64>> {
        let mut map = HashMap::new();
        map.insert(stage.to_string(), values.to_vec());
        map
    }

    #[test]
    fn single_mode_reuses_one_timer() {
        let mut manager = TimerManager::new(false);
        manager.reset();
        manager.record_all(&samples("a", &[1.0]));
        manager.reset();
        manager.record_all(&samples("a", &[3.0]));

        assert_eq!(manager.inferences().len(), 1);
        assert_eq!(manager.all_times()["a"], vec![3.0]);
    }

    #[test]
    fn multi_mode_appends_per_request() {
        let mut manager = TimerManager::new(true);
        for run in 0..3 {
            manager.reset();
            manager.record_all(&samples("a", &[run as f64]));
        }

        // the implicit first timer plus one per reset, with the last three
        // carrying the recorded runs
        assert_eq!(manager.inferences().len(), 4);
        assert_eq!(manager.all_times()["a"], vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn aggregates_raw_samples_not_per_run_averages() {
        let mut manager = TimerManager::new(true);
        // run one: two samples averaging 1.0
        manager.reset();
        manager.record_all(&samples("a", &[0.0, 2.0]));
        // run two: a single sample of 7.0
        manager.reset();
        manager.record_all(&samples("a", &[7.0]));

        // merged mean is 3.0; the mean of per-run averages would be 4.0
        let times = manager.times().unwrap();
        assert!((times["a"] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_manager_is_inert() {
        let mut manager = TimerManager::new(true);
        manager.set_enabled(false);
        manager.reset();
        manager.record_all(&samples("a", &[1.0]));
        assert!(manager.inferences().is_empty());
        assert!(manager.all_times().is_empty());
    }

    #[test]
    fn first_mutating_call_creates_a_timer() {
        let mut manager = TimerManager::new(false);
        assert!(manager.inferences().is_empty());
        manager.record_all(&samples("a", &[1.0]));
        assert_eq!(manager.inferences().len(), 1);
    }
}
