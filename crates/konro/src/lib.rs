//! # Konro
//!
//! An asynchronous **batched pipeline inference runtime**: a small core
//! that drives a request through a directed graph of processing stages,
//! decides the next stage with a pluggable router, dispatches stage
//! execution onto schedulers — including a continuous-batching scheduler
//! that coalesces concurrently arriving requests for the same stage into
//! one batched call — records nested per-stage timing for every request,
//! and lets ordered middleware observe stage transitions.
//!
//! ## Architecture
//!
//! A [`pipeline::Pipeline`] owns everything a request needs:
//!
//! * [`operator::Operator`] — one typed stage: structural input/output
//!   contracts ([`schema::Schema`]) around an async `run`.
//! * [`router::Router`] — a pure function from (stage, output) to the next
//!   stage id; ships as [`router::LinearRouter`] and [`router::GraphRouter`]
//!   (with conditional branching on output content).
//! * [`schedulers`] — direct dispatch on a bounded worker pool, or a
//!   per-operator continuous-batching worker with FIFO fairness, a
//!   `max_batch_size`/`max_wait` wake rule, backpressure, and whole-batch
//!   failure semantics.
//! * [`middleware::Middleware`] — ordered, trusted observers of stage
//!   start/end events.
//! * [`timing`] — per-request stage timers aggregated across invocations by
//!   a [`timing::TimerManager`].
//!
//! The numeric backend that actually executes a model is deliberately
//! outside this crate: an operator is an opaque async callable over
//! `serde_json::Value` payloads, and a batched invocation stacks per-item
//! inputs into a `Value::Array` along the leading dimension.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use konro::pipeline::Pipeline;
//! use serde_json::json;
//!
//! # async fn example(add_one: Arc<dyn konro::operator::Operator>) {
//! let pipeline = Pipeline::builder()
//!     .operator(add_one)
//!     .build()
//!     .unwrap();
//!
//! let out = pipeline.call(json!({"value": 5})).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod middleware;
pub mod operator;
pub mod pipeline;
pub mod router;
pub mod schedulers;
pub mod schema;
pub mod state;
pub mod timing;

pub use error::{ErrorKind, PipelineError, TimeoutKind};
pub use operator::{Operator, OperatorError};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use router::{GraphRouter, LinearRouter, RouteDecision, RouteRule, Router};
pub use schedulers::{AdmissionPolicy, BatchConfig, SchedulerChoice};
pub use schema::{FieldKind, Schema, SchemaError};
pub use state::InferenceState;
pub use timing::{InferenceTimer, TimerError, TimerManager, TimingSummary};
