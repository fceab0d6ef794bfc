//! Pipeline strategy
//!
//! Tasks run strictly in decision order. Each stage receives the request plus
//! the previous stage's payload. The first stage that does not succeed halts
//! the pipeline; every later stage is cancelled without being invoked.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::{ExecutionContext, ExecutionPlan};
use super::runner::{run_task, skip_task, TaskOutcome};
use super::{ExecutionStrategy, StrategyReport};
use crate::classifier::StrategyKind;

pub struct PipelineStrategy;

#[async_trait]
impl ExecutionStrategy for PipelineStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pipeline
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> StrategyReport {
        let tasks = plan.tasks();
        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut upstream = None;
        let mut halted_at = None;

        for (stage, task) in tasks.iter().enumerate() {
            if halted_at.is_some() {
                outcomes.push(skip_task(ctx, plan, task, "upstream stage did not succeed"));
                continue;
            }

            let mut input = plan.input(task);
            if let Some(previous) = upstream.take() {
                input = input.with_upstream(previous);
            }

            let outcome = run_task(ctx, plan, task, input, cancel).await;
            match &outcome {
                TaskOutcome::Succeeded(result) => upstream = Some(result.payload.clone()),
                _ => {
                    warn!(
                        request_id = %plan.request_id,
                        stage,
                        agent_id = %task.agent_id,
                        "Pipeline halted"
                    );
                    halted_at = Some(stage);
                }
            }
            outcomes.push(outcome);
        }

        if halted_at.is_none() {
            info!(request_id = %plan.request_id, stages = tasks.len(), "Pipeline completed");
        }
        StrategyReport {
            outcomes,
            resolution: None,
        }
    }
}
