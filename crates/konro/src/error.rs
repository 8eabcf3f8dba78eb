//! # Error Types
//!
//! The error taxonomy for the pipeline runtime. Every failure a request can
//! observe is one of the kinds below, wrapped in a [`PipelineError`] that
//! records which stage failed and the timing recorded up to that point.
//!
//! None of these kinds are retried by the runtime itself. Retrying, where it
//! makes sense at all (timeouts, queue admission), is the caller's decision.

use std::collections::HashMap;

use thiserror::Error;

use crate::router::OperatorId;
use crate::schema::SchemaError;
use crate::timing::TimerError;

/// Which deadline was exceeded when a [`ErrorKind::Timeout`] is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The caller's wait for queue admission (backpressure) expired.
    QueueAdmission,
    /// The caller's wait for a batched result expired.
    BatchWait,
}

/// The failure kinds a request can surface.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// An operator's input or output failed its structural contract.
    #[error("contract violation: {0}")]
    Validation(#[from] SchemaError),

    /// The router produced an unknown id, consumed its hop budget, or could
    /// not inspect the output it was asked to branch on.
    #[error("routing failed: {0}")]
    Routing(#[from] crate::router::RoutingError),

    /// Unbalanced `start`/`stop` calls or an average over an empty stage.
    /// Programmer error, never corrected silently.
    #[error("timing misuse: {0}")]
    Timing(#[from] TimerError),

    /// A scheduling deadline expired. Distinct from other failures so the
    /// caller can choose to retry.
    #[error("scheduling timeout ({0:?})")]
    Timeout(TimeoutKind),

    /// The batching queue was at capacity and the admission policy rejects
    /// rather than blocks.
    #[error("batching queue is full")]
    QueueFull,

    /// The operator itself failed while running.
    #[error("operator failed: {0}")]
    Operator(String),

    /// A batched invocation failed; every entry in that batch observes this
    /// same error. The runtime cannot attribute the failure to one item.
    #[error("batched execution failed: {0}")]
    BatchExecution(String),

    /// A middleware hook failed. Instrumentation is trusted, so this halts
    /// the request rather than being swallowed.
    #[error("middleware failed: {0}")]
    Middleware(String),

    /// The worker backing a scheduler is gone (dropped sender, failed join).
    #[error("scheduler failed: {0}")]
    Scheduler(String),

    /// The scheduler was shut down while the entry was still queued.
    #[error("scheduler shut down before the request was served")]
    Shutdown,
}

/// A failed pipeline request.
///
/// Carries the id of the stage that was running when the failure occurred
/// (`None` when the request never reached a stage, e.g. the router rejected
/// the start id) and a snapshot of every timing sample recorded before the
/// failure, for diagnostics.
#[derive(Debug)]
pub struct PipelineError {
    /// Stage that was executing when the request failed.
    pub stage: Option<OperatorId>,

    /// What went wrong.
    pub kind: ErrorKind,

    /// Raw timing samples recorded before the failure, by stage name.
    pub timing: HashMap<String, Vec<f64>>,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "pipeline failed at stage {}: {}", stage, self.kind),
            None => write!(f, "pipeline failed: {}", self.kind),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl PipelineError {
    /// Wraps a kind with no stage attribution and no timing.
    pub fn bare(kind: ErrorKind) -> Self {
        Self {
            stage: None,
            kind,
            timing: HashMap::new(),
        }
    }

    /// Wraps a kind, attributing it to the given stage.
    pub fn at_stage(stage: OperatorId, kind: ErrorKind) -> Self {
        Self {
            stage: Some(stage),
            kind,
            timing: HashMap::new(),
        }
    }

    /// Attaches the request's timing snapshot.
    pub fn with_timing(mut self, timing: HashMap<String, Vec<f64>>) -> Self {
        self.timing = timing;
        self
    }
}

impl From<ErrorKind> for PipelineError {
    fn from(kind: ErrorKind) -> Self {
        PipelineError::bare(kind)
    }
}

impl From<crate::operator::OperatorError> for ErrorKind {
    fn from(err: crate::operator::OperatorError) -> Self {
        match err {
            crate::operator::OperatorError::Failed(message) => ErrorKind::Operator(message),
            crate::operator::OperatorError::Timing(timing) => ErrorKind::Timing(timing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage() {
        let err = PipelineError::at_stage(1, ErrorKind::QueueFull);
        let rendered = format!("{}", err);
        assert!(rendered.contains("stage 1"));
        assert!(rendered.contains("queue is full"));
    }

    #[test]
    fn display_without_stage() {
        let err = PipelineError::bare(ErrorKind::Shutdown);
        let rendered = format!("{}", err);
        assert!(!rendered.contains("stage"));
    }
}
