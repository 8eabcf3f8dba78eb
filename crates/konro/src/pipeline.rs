//! # Pipeline
//!
//! The orchestrator that drives one request through the operator graph:
//! create the request's [`InferenceState`], ask the [`Router`] for the first
//! stage, then loop — validate input, fire middleware, dispatch to the
//! stage's scheduler, validate output, fire middleware, route — until the
//! router terminates or something fails.
//!
//! Everything the loop touches besides the per-request state and the
//! batching queues is configuration, read-only after construction, so one
//! pipeline serves any number of concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, PipelineError};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::operator::Operator;
use crate::router::{LinearRouter, OperatorId, RouteDecision, Router, RoutingError};
use crate::schedulers::{ContinuousBatchingScheduler, OperatorScheduler, SchedulerChoice};
use crate::state::InferenceState;
use crate::timing::{TimerError, TimerManager, TimingSummary};

/// Stage name under which a whole request's duration is recorded.
pub const TOTAL_STAGE: &str = "total";

enum Dispatcher {
    Direct(Arc<OperatorScheduler>),
    Batching(Arc<ContinuousBatchingScheduler>),
}

/// An executable operator graph.
///
/// Owns its router, schedulers, middleware chain, and [`TimerManager`];
/// build one with [`Pipeline::builder`], then [`Pipeline::call`] it from as
/// many tasks as needed.
pub struct Pipeline {
    operators: Vec<Arc<dyn Operator>>,
    router: Arc<dyn Router>,
    dispatchers: Vec<Dispatcher>,
    middleware: MiddlewareChain,
    timer_manager: Mutex<TimerManager>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.operators.iter().map(|op| op.name()).collect();
        f.debug_struct("Pipeline")
            .field("stages", &stages)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Runs one request to completion.
    ///
    /// On success the terminal stage's output is the result. On failure the
    /// error names the failing stage and carries the timing recorded up to
    /// that point; nothing is retried internally.
    pub async fn call(&self, input: Value) -> Result<Value, PipelineError> {
        self.timer_manager.lock().await.reset();

        let state = InferenceState::new();
        tracing::debug!(request = %state.id(), "pipeline request started");

        let outcome = self.run_request(input, &state).await;

        let snapshot = state.timing_snapshot().await;
        self.timer_manager.lock().await.record_all(&snapshot);

        match outcome {
            Ok(output) => {
                tracing::debug!(request = %state.id(), "pipeline request terminated");
                Ok(output)
            }
            Err((stage, kind)) => {
                tracing::warn!(request = %state.id(), ?stage, error = %kind, "pipeline request failed");
                Err(PipelineError {
                    stage,
                    kind,
                    timing: snapshot,
                })
            }
        }
    }

    /// Stage name to every raw duration sample recorded so far, across all
    /// tracked inferences.
    pub async fn all_times(&self) -> HashMap<String, Vec<f64>> {
        self.timer_manager.lock().await.all_times()
    }

    /// Stage name to average duration, computed over merged raw samples.
    pub async fn average_times(&self) -> Result<HashMap<String, f64>, TimerError> {
        self.timer_manager.lock().await.times()
    }

    /// Serializable export of averages and raw samples, for an external
    /// metrics or logging collaborator.
    pub async fn timing_summary(&self) -> Result<TimingSummary, TimerError> {
        self.timer_manager.lock().await.summary()
    }

    /// Number of timing records the manager currently tracks.
    pub async fn inference_count(&self) -> usize {
        self.timer_manager.lock().await.inferences().len()
    }

    async fn run_request(
        &self,
        input: Value,
        state: &InferenceState,
    ) -> Result<Value, (Option<OperatorId>, ErrorKind)> {
        state
            .start_timing(TOTAL_STAGE)
            .await
            .map_err(|err| (None, ErrorKind::Timing(err)))?;

        let budget = self.router.hop_budget();
        let mut current = self.router.start();
        let mut payload = input;
        let mut hops = 0usize;

        loop {
            let operator = self
                .operators
                .get(current)
                .ok_or((
                    Some(current),
                    ErrorKind::Routing(RoutingError::UnknownOperator(current)),
                ))?
                .clone();
            let stage = operator.name().to_string();

            operator
                .input_schema()
                .validate(&payload)
                .map_err(|err| (Some(current), ErrorKind::Validation(err)))?;

            self.middleware
                .start(&stage, state)
                .await
                .map_err(|err| (Some(current), ErrorKind::Middleware(err.0)))?;

            tracing::trace!(%stage, hop = hops, "dispatching stage");
            let output = self
                .dispatch(current, operator.clone(), payload, state)
                .await
                .map_err(|kind| (Some(current), kind))?;

            operator
                .output_schema()
                .validate(&output)
                .map_err(|err| (Some(current), ErrorKind::Validation(err)))?;

            self.middleware
                .end(&stage, state)
                .await
                .map_err(|err| (Some(current), ErrorKind::Middleware(err.0)))?;

            hops += 1;
            if hops > budget {
                return Err((
                    Some(current),
                    ErrorKind::Routing(RoutingError::HopBudgetExhausted { budget }),
                ));
            }

            match self
                .router
                .next(current, &output)
                .map_err(|err| (Some(current), ErrorKind::Routing(err)))?
            {
                RouteDecision::Terminate => {
                    payload = output;
                    break;
                }
                RouteDecision::Next(next) => {
                    current = next;
                    payload = output;
                }
            }
        }

        state
            .stop_timing(TOTAL_STAGE)
            .await
            .map_err(|err| (None, ErrorKind::Timing(err)))?;

        Ok(payload)
    }

    async fn dispatch(
        &self,
        id: OperatorId,
        operator: Arc<dyn Operator>,
        input: Value,
        state: &InferenceState,
    ) -> Result<Value, ErrorKind> {
        match &self.dispatchers[id] {
            Dispatcher::Direct(scheduler) => {
                scheduler.submit(operator, input, state.clone()).await
            }
            Dispatcher::Batching(scheduler) => {
                let item = scheduler.submit(input, state.clone()).await?;
                item.await
            }
        }
    }
}

/// Assembles a [`Pipeline`]: operators in registration order (their position
/// is their id), the router, per-stage scheduler choices, middleware, and
/// timing mode.
pub struct PipelineBuilder {
    operators: Vec<(Arc<dyn Operator>, SchedulerChoice)>,
    router: Option<Arc<dyn Router>>,
    middleware: Vec<Arc<dyn Middleware>>,
    workers: Option<usize>,
    multi_inference: bool,
    timing_enabled: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
            router: None,
            middleware: Vec::new(),
            workers: None,
            multi_inference: false,
            timing_enabled: true,
        }
    }
}

impl PipelineBuilder {
    /// Registers an operator behind the shared direct scheduler.
    pub fn operator(self, operator: Arc<dyn Operator>) -> Self {
        self.operator_with(operator, SchedulerChoice::Direct)
    }

    /// Registers an operator with an explicit scheduler choice.
    pub fn operator_with(mut self, operator: Arc<dyn Operator>, choice: SchedulerChoice) -> Self {
        self.operators.push((operator, choice));
        self
    }

    /// Sets the router. Defaults to a linear chain over the registered
    /// operators.
    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Appends a middleware observer; registration order is event order.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sizes the direct scheduler's worker pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Keeps one timing record per request instead of reusing a single one.
    pub fn multi_inference(mut self, multi_inference: bool) -> Self {
        self.multi_inference = multi_inference;
        self
    }

    /// Disables timing entirely; every recording call becomes a no-op.
    pub fn timing_disabled(mut self) -> Self {
        self.timing_enabled = false;
        self
    }

    /// Validates the route table against the registered operators and
    /// assembles the pipeline.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let operator_count = self.operators.len();
        let router: Arc<dyn Router> = match self.router {
            Some(router) => router,
            None => Arc::new(LinearRouter::new(operator_count)),
        };
        router
            .validate(operator_count)
            .map_err(|err| PipelineError::bare(ErrorKind::Routing(err)))?;

        let direct = Arc::new(OperatorScheduler::new(
            self.workers.unwrap_or(OperatorScheduler::DEFAULT_WORKERS),
        ));

        let mut operators = Vec::with_capacity(operator_count);
        let mut dispatchers = Vec::with_capacity(operator_count);
        for (operator, choice) in self.operators {
            let dispatcher = match choice {
                SchedulerChoice::Direct => Dispatcher::Direct(direct.clone()),
                SchedulerChoice::ContinuousBatching(config) => Dispatcher::Batching(Arc::new(
                    ContinuousBatchingScheduler::new(operator.clone(), config),
                )),
            };
            operators.push(operator);
            dispatchers.push(dispatcher);
        }

        let mut timer_manager = TimerManager::new(self.multi_inference);
        timer_manager.set_enabled(self.timing_enabled);

        Ok(Pipeline {
            operators,
            router,
            dispatchers,
            middleware: MiddlewareChain::new(self.middleware),
            timer_manager: Mutex::new(timer_manager),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::test_support::{FailOnStart, OrderTracker};
    use crate::operator::test_support::{AddOperator, FailingOperator};
    use crate::operator::OperatorError;
    use crate::router::{GraphRouter, RouteRule};
    use crate::schedulers::{AdmissionPolicy, BatchConfig};
    use crate::schema::{FieldKind, Schema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn add_three_pipeline() -> Pipeline {
        Pipeline::builder()
            .operator(Arc::new(AddOperator::with_sleep(
                "add_one",
                1,
                Duration::from_millis(200),
            )))
            .operator(Arc::new(AddOperator::with_sleep(
                "add_two",
                2,
                Duration::from_millis(500),
            )))
            .router(Arc::new(LinearRouter::new(2)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn linear_pipeline_adds_three_and_records_times() {
        let pipeline = add_three_pipeline();

        let output = pipeline.call(json!({"value": 5})).await.unwrap();
        assert_eq!(output, json!({"value": 8}));

        let times = pipeline.all_times().await;
        assert_eq!(times.len(), 3);
        for stage in [TOTAL_STAGE, "add_one", "add_two"] {
            assert_eq!(times[stage].len(), 1, "missing stage {stage}");
        }

        // orchestration overhead makes the total strictly larger than the
        // sum of the stage durations
        assert!(times[TOTAL_STAGE][0] > times["add_one"][0] + times["add_two"][0]);
    }

    #[tokio::test]
    async fn middleware_sees_stages_in_execution_order() {
        let tracker = Arc::new(OrderTracker::default());
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .operator(Arc::new(AddOperator::new("add_two", 2)))
            .middleware(tracker.clone())
            .build()
            .unwrap();

        pipeline.call(json!({"value": 5})).await.unwrap();

        let expected = vec!["add_one".to_string(), "add_two".to_string()];
        assert_eq!(*tracker.start_order.lock().unwrap(), expected);
        // end events fire in the same order as start events, not reversed
        assert_eq!(*tracker.end_order.lock().unwrap(), expected);
    }

    /// Tags its output with `skip` so the graph router can branch on it.
    struct ThresholdOperator {
        threshold: i64,
    }

    #[async_trait]
    impl Operator for ThresholdOperator {
        fn name(&self) -> &str {
            "threshold"
        }

        fn input_schema(&self) -> Schema {
            Schema::new().field("value", FieldKind::Integer)
        }

        fn output_schema(&self) -> Schema {
            Schema::new()
                .field("value", FieldKind::Integer)
                .field("skip", FieldKind::Bool)
        }

        async fn run(
            &self,
            input: Value,
            _state: &InferenceState,
        ) -> Result<Value, OperatorError> {
            let value = input
                .get("value")
                .and_then(Value::as_i64)
                .ok_or_else(|| OperatorError::failed("no integer `value`"))?;
            Ok(json!({"value": value, "skip": value >= self.threshold}))
        }
    }

    fn branching_pipeline() -> Pipeline {
        // 0 = threshold, 1 = add_ten (skippable), 2 = add_one (final)
        let mut rules = std::collections::HashMap::new();
        rules.insert(
            0,
            RouteRule::Branch {
                field: "skip".to_string(),
                if_true: 2,
                if_false: 1,
            },
        );
        rules.insert(1, RouteRule::Next(2));
        rules.insert(2, RouteRule::End);

        Pipeline::builder()
            .operator(Arc::new(ThresholdOperator { threshold: 10 }))
            .operator(Arc::new(AddOperator::new("add_ten", 10)))
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .router(Arc::new(GraphRouter::new(0, rules)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn graph_router_takes_both_branches() {
        let pipeline = branching_pipeline();

        // below threshold: threshold -> add_ten -> add_one
        let long_way = pipeline.call(json!({"value": 5})).await.unwrap();
        assert_eq!(long_way["value"], json!(16));

        // at threshold: threshold -> add_one
        let short_way = pipeline.call(json!({"value": 20})).await.unwrap();
        assert_eq!(short_way["value"], json!(21));
    }

    #[tokio::test]
    async fn multi_inference_keeps_one_record_per_request() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .multi_inference(true)
            .build()
            .unwrap();

        for _ in 0..3 {
            pipeline.call(json!({"value": 1})).await.unwrap();
        }

        let times = pipeline.all_times().await;
        assert_eq!(times[TOTAL_STAGE].len(), 3);
        assert_eq!(times["add_one"].len(), 3);
        assert!(pipeline.average_times().await.unwrap()[TOTAL_STAGE] > 0.0);
    }

    #[tokio::test]
    async fn single_inference_reuses_one_record() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .build()
            .unwrap();

        for _ in 0..3 {
            pipeline.call(json!({"value": 1})).await.unwrap();
        }

        let times = pipeline.all_times().await;
        assert_eq!(times[TOTAL_STAGE].len(), 1);
    }

    #[tokio::test]
    async fn operator_failure_names_the_stage_and_keeps_timing() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .operator(Arc::new(FailingOperator))
            .build()
            .unwrap();

        let err = pipeline.call(json!({"value": 1})).await.unwrap_err();
        assert_eq!(err.stage, Some(1));
        assert!(matches!(err.kind, ErrorKind::Operator(_)));
        // the first stage completed, so its sample survives in the snapshot
        assert_eq!(err.timing["add_one"].len(), 1);
    }

    #[tokio::test]
    async fn input_contract_violation_fails_the_request() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .build()
            .unwrap();

        let err = pipeline.call(json!({"other": 1})).await.unwrap_err();
        assert_eq!(err.stage, Some(0));
        assert!(matches!(err.kind, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn middleware_failure_halts_the_request() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .operator(Arc::new(AddOperator::new("add_two", 2)))
            .middleware(Arc::new(FailOnStart("add_two".to_string())))
            .build()
            .unwrap();

        let err = pipeline.call(json!({"value": 1})).await.unwrap_err();
        assert_eq!(err.stage, Some(1));
        assert!(matches!(err.kind, ErrorKind::Middleware(_)));
    }

    #[tokio::test]
    async fn batched_stage_runs_inside_the_pipeline() {
        let config = BatchConfig {
            max_batch_size: 4,
            max_wait: Duration::from_millis(20),
            capacity: 16,
            admission: AdmissionPolicy::Block,
            admission_timeout: Duration::from_secs(1),
            result_timeout: None,
        };
        let pipeline = Pipeline::builder()
            .operator_with(
                Arc::new(AddOperator::new("batched_add", 1)),
                SchedulerChoice::ContinuousBatching(config),
            )
            .operator(Arc::new(AddOperator::new("add_two", 2)))
            .build()
            .unwrap();

        let output = pipeline.call(json!({"value": 5})).await.unwrap();
        assert_eq!(output, json!({"value": 8}));

        // the batched stage's shared duration is attributed to the request
        let times = pipeline.all_times().await;
        assert_eq!(times["batched_add"].len(), 1);
    }

    #[tokio::test]
    async fn build_rejects_unclosed_routes() {
        let mut rules = std::collections::HashMap::new();
        rules.insert(0, RouteRule::Next(1));
        // stage 1 exists but has no rule

        let err = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("a", 1)))
            .operator(Arc::new(AddOperator::new("b", 2)))
            .router(Arc::new(GraphRouter::new(0, rules)))
            .build()
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Routing(_)));
    }

    #[tokio::test]
    async fn cyclic_route_exhausts_its_hop_budget() {
        let mut rules = std::collections::HashMap::new();
        rules.insert(0, RouteRule::Next(1));
        rules.insert(1, RouteRule::Next(0));

        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("a", 1)))
            .operator(Arc::new(AddOperator::new("b", 2)))
            .router(Arc::new(GraphRouter::new(0, rules).with_hop_budget(6)))
            .build()
            .unwrap();

        let err = pipeline.call(json!({"value": 1})).await.unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Routing(RoutingError::HopBudgetExhausted { budget: 6 })
        ));
    }

    #[tokio::test]
    async fn debug_output_names_the_stages() {
        let rendered = format!("{:?}", add_three_pipeline());
        assert!(rendered.contains("add_one"));
        assert!(rendered.contains("add_two"));
    }

    #[tokio::test]
    async fn disabled_timing_records_nothing() {
        let pipeline = Pipeline::builder()
            .operator(Arc::new(AddOperator::new("add_one", 1)))
            .timing_disabled()
            .build()
            .unwrap();

        pipeline.call(json!({"value": 1})).await.unwrap();
        assert!(pipeline.all_times().await.is_empty());
    }
}
