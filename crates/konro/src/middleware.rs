//! # Middleware
//!
//! Ordered observers invoked around every operator call: `on_start` before
//! the stage runs, `on_end` after its output validated. Both events fire in
//! registration order — end events are pipeline-position boundaries, not a
//! stack, so they are not reversed.
//!
//! Middleware is trusted instrumentation. It observes the stage name and the
//! request's [`InferenceState`] and must not mutate control flow; a hook
//! failure halts the request rather than being swallowed, so instrumentation
//! bugs never run silently.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::state::InferenceState;

/// A middleware hook failure. Fatal for the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An observer of stage transitions.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Called before the named stage executes.
    async fn on_start(&self, stage: &str, state: &InferenceState) -> Result<(), MiddlewareError>;

    /// Called after the named stage's output validated.
    async fn on_end(&self, stage: &str, state: &InferenceState) -> Result<(), MiddlewareError>;
}

/// The registered observers of one pipeline, in registration order.
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    observers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(observers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { observers }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Fires `on_start` on every observer, registration order, stopping at
    /// the first failure.
    pub async fn start(&self, stage: &str, state: &InferenceState) -> Result<(), MiddlewareError> {
        for observer in &self.observers {
            observer.on_start(stage, state).await?;
        }
        Ok(())
    }

    /// Fires `on_end` on every observer, registration order (same as start),
    /// stopping at the first failure.
    pub async fn end(&self, stage: &str, state: &InferenceState) -> Result<(), MiddlewareError> {
        for observer in &self.observers {
            observer.on_end(stage, state).await?;
        }
        Ok(())
    }
}
