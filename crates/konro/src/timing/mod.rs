//! # Stage Timing
//!
//! Hierarchical stage-duration recording for pipeline requests.
//!
//! * [`InferenceTimer`] records named stage durations for one in-flight
//!   request. Stages are independent namespaces, so nesting one stage inside
//!   another is legal and both are tracked to completion.
//!
//! * [`TimerManager`] aggregates timers across repeated pipeline invocations,
//!   either reusing a single timer or appending one per inference.
//!
//! Unbalanced `start`/`stop` calls are programmer errors and fail loudly as
//! [`TimerError`]; the runtime never corrects them silently.

mod manager;
mod timer;

pub use manager::{TimerManager, TimingSummary};
pub use timer::{InferenceTimer, TimerError};
