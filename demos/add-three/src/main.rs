//! Two-stage linear pipeline with a continuous-batched first stage.
//!
//! Fires a burst of concurrent requests; the batched stage coalesces them
//! while the second stage runs per request, then prints the aggregated
//! per-stage timing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use konro::{
    AdmissionPolicy, BatchConfig, FieldKind, InferenceState, LinearRouter, Operator,
    OperatorError, Pipeline, Schema, SchedulerChoice,
};
use serde_json::{Value, json};

struct AddOperator {
    name: &'static str,
    amount: i64,
    sleep: Duration,
}

impl AddOperator {
    fn add(&self, item: &Value) -> Result<Value, OperatorError> {
        let value = item
            .get("value")
            .and_then(Value::as_i64)
            .ok_or_else(|| OperatorError::failed("no integer `value`"))?;
        Ok(json!({"value": value + self.amount}))
    }
}

#[async_trait]
impl Operator for AddOperator {
    fn name(&self) -> &str {
        self.name
    }

    fn input_schema(&self) -> Schema {
        Schema::new().field("value", FieldKind::Integer)
    }

    fn output_schema(&self) -> Schema {
        Schema::new().field("value", FieldKind::Integer)
    }

    async fn run(&self, input: Value, state: &InferenceState) -> Result<Value, OperatorError> {
        state.start_timing(self.name).await?;
        tokio::time::sleep(self.sleep).await;
        let output = match &input {
            Value::Array(items) => {
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    outputs.push(self.add(item)?);
                }
                Value::Array(outputs)
            }
            single => self.add(single)?,
        };
        state.stop_timing(self.name).await?;
        Ok(output)
    }
}

#[tokio::main]
async fn main() {
    let batch_config = BatchConfig {
        max_batch_size: 10,
        max_wait: Duration::from_millis(25),
        capacity: 64,
        admission: AdmissionPolicy::Block,
        admission_timeout: Duration::from_secs(5),
        result_timeout: None,
    };

    let pipeline = Arc::new(
        Pipeline::builder()
            .operator_with(
                Arc::new(AddOperator {
                    name: "add_one",
                    amount: 1,
                    sleep: Duration::from_millis(200),
                }),
                SchedulerChoice::ContinuousBatching(batch_config),
            )
            .operator(Arc::new(AddOperator {
                name: "add_two",
                amount: 2,
                sleep: Duration::from_millis(50),
            }))
            .router(Arc::new(LinearRouter::new(2)))
            .multi_inference(true)
            .build()
            .expect("valid pipeline"),
    );

    let handles = (0..10)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let output = pipeline.call(json!({"value": i})).await;
                println!("request {i} -> {output:?}");
            })
        })
        .collect::<Vec<_>>();

    for handle in futures::future::join_all(handles).await {
        if let Err(e) = handle {
            println!("Err joining handle: {e:?}");
        }
    }

    match pipeline.timing_summary().await {
        Ok(summary) => {
            for (stage, average) in summary.times {
                println!(
                    "stage {stage}: avg {average:.4}s over {} samples",
                    summary.all_times[&stage].len()
                );
            }
        }
        Err(e) => println!("no timing available: {e}"),
    }
}
