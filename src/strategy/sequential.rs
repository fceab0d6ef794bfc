//! Sequential strategy: call and wait, no retry at this layer

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::context::{ExecutionContext, ExecutionPlan};
use super::runner::run_task;
use super::{ExecutionStrategy, StrategyReport};
use crate::classifier::StrategyKind;

pub struct SequentialStrategy;

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> StrategyReport {
        let mut outcomes = Vec::new();
        // Routing gives this strategy one task; extra tasks run one after another
        for task in plan.tasks() {
            let outcome = run_task(ctx, plan, &task, plan.input(&task), cancel).await;
            outcomes.push(outcome);
        }
        StrategyReport {
            outcomes,
            resolution: None,
        }
    }
}
