//! # Routing
//!
//! A [`Router`] is a pure function from (current stage, operator output) to
//! the next stage id, or to termination. It is stateless beyond its
//! configuration, so one router serves every concurrent request without
//! locking.
//!
//! Two variants ship with the runtime:
//!
//! * [`LinearRouter`] — stage ids are integer positions; every output moves
//!   to the next position until the configured end.
//! * [`GraphRouter`] — an explicit adjacency map, optionally branching on a
//!   boolean field of the current output.
//!
//! Routing never loops silently: the pipeline charges every hop against the
//! router's budget and fails the request once it is spent.

mod graph;
mod linear;

pub use graph::{GraphRouter, RouteRule};
pub use linear::LinearRouter;

use serde_json::Value;
use thiserror::Error;

/// Position of an operator in the pipeline's registration order.
pub type OperatorId = usize;

/// What the router decided for the current output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Dispatch the output to this stage next.
    Next(OperatorId),
    /// The current output is the pipeline result.
    Terminate,
}

/// A routing failure. Fatal for the request, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no operator registered for id {0}")]
    UnknownOperator(OperatorId),

    #[error("stage {stage} branches on `{field}`, which is missing or not a bool")]
    MissingBranchField { stage: OperatorId, field: String },

    #[error("terminal not reached within {budget} hops")]
    HopBudgetExhausted { budget: usize },

    #[error("route table is not closed: {0}")]
    NotClosed(String),
}

/// Decides the next stage from the current one and its output.
///
/// Implementations must be pure with respect to the output value: same
/// inputs, same decision. The pipeline shares one router across requests.
pub trait Router: Send + Sync {
    /// Id of the first stage to execute.
    fn start(&self) -> OperatorId;

    /// Next stage for the given output of `current`, or termination.
    fn next(&self, current: OperatorId, output: &Value) -> Result<RouteDecision, RoutingError>;

    /// Maximum hops before the pipeline declares the route unreachable.
    fn hop_budget(&self) -> usize;

    /// Checks the route table against the number of registered operators:
    /// every id the router can yield must name a registered operator.
    fn validate(&self, operator_count: usize) -> Result<(), RoutingError>;
}
