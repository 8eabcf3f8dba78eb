//! # Operators
//!
//! An [`Operator`] is one typed processing stage of the pipeline graph. It
//! validates nothing itself — the pipeline checks its declared input and
//! output [`Schema`]s around every call — and it never decides routing; it
//! only produces the data the router inspects.
//!
//! Operators may bracket expensive internal work with named timing stages on
//! the shared [`InferenceState`].
//!
//! ## Batched invocation
//!
//! A continuous-batching scheduler hands the operator a `Value::Array` of
//! per-item inputs stacked along the leading dimension. The operator must
//! return an array of the same length, element `i` corresponding to input
//! `i`. Direct dispatch always passes a single object.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::schema::Schema;
use crate::state::InferenceState;
use crate::timing::TimerError;

/// Failure produced by an operator body.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The operator could not produce an output.
    #[error("{0}")]
    Failed(String),

    /// The operator misused its timing stages.
    #[error(transparent)]
    Timing(#[from] TimerError),
}

impl OperatorError {
    pub fn failed(message: impl Into<String>) -> Self {
        OperatorError::Failed(message.into())
    }
}

/// One processing stage: a named unit of work with structural input and
/// output contracts.
///
/// Implementations must be thread-safe; the same instance serves every
/// concurrent request, and a batching scheduler calls it from a dedicated
/// worker task.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Stable name used for timing stages, middleware events, and logs.
    fn name(&self) -> &str;

    /// Contract the input value must satisfy before `run` is called.
    fn input_schema(&self) -> Schema;

    /// Contract the produced value must satisfy.
    fn output_schema(&self) -> Schema;

    /// Produces the stage's output from a validated input.
    async fn run(&self, input: Value, state: &InferenceState) -> Result<Value, OperatorError>;
}
