//! Parallel strategy
//!
//! Every task starts at once; each agent's semaphore bounds its own
//! concurrency. One task failing never affects the others.

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::context::{ExecutionContext, ExecutionPlan};
use super::runner::{run_task, TaskOutcome};
use super::{ExecutionStrategy, StrategyReport};
use crate::classifier::StrategyKind;

pub struct ParallelStrategy;

/// Run all planned tasks concurrently; outcomes come back in plan order
pub(crate) async fn run_all(
    ctx: &ExecutionContext,
    plan: &ExecutionPlan,
    cancel: &CancellationToken,
) -> Vec<TaskOutcome> {
    let tasks = plan.tasks();
    join_all(
        tasks
            .iter()
            .map(|task| run_task(ctx, plan, task, plan.input(task), cancel)),
    )
    .await
}

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Parallel
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> StrategyReport {
        StrategyReport {
            outcomes: run_all(ctx, plan, cancel).await,
            resolution: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::TaskStatus;
    use crate::strategy::testing::{fixture, ScriptedAgent};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn runs_concurrently_and_isolates_failures() {
        let a = ScriptedAgent::ok("a", Duration::from_millis(500), json!("a-result"), 0.8);
        let b = ScriptedAgent::failing("b", Duration::from_millis(500), "down");
        let f = fixture(vec![a, b]);
        let plan = f.plan("do both", &["a", "b"]);

        let started = Instant::now();
        let report = ParallelStrategy
            .execute(&f.ctx, &plan, &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(report.outcomes[0].is_success());
        assert!(!report.outcomes[1].is_success());
        let statuses: Vec<TaskStatus> = plan.board.snapshot().iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TaskStatus::Succeeded, TaskStatus::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn per_agent_semaphore_bounds_concurrency() {
        let a = ScriptedAgent::ok("a", Duration::from_millis(100), json!(1), 0.8);
        let f = fixture(vec![a.clone()]);
        // Two requests for the same single-slot agent
        let first = f.plan("one", &["a"]);
        let second = f.plan("two", &["a"]);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let (r1, r2) = tokio::join!(
            ParallelStrategy.execute(&f.ctx, &first, &cancel),
            ParallelStrategy.execute(&f.ctx, &second, &cancel),
        );
        assert!(r1.outcomes[0].is_success() && r2.outcomes[0].is_success());
        assert_eq!(a.max_in_flight(), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_running_tasks() {
        let slow = ScriptedAgent::ok("a", Duration::from_secs(60), json!(1), 0.8);
        let f = fixture(vec![slow]);
        let plan = f.plan("slow", &["a"]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let report = ParallelStrategy.execute(&f.ctx, &plan, &cancel).await;

        assert!(matches!(report.outcomes[0], TaskOutcome::Cancelled { .. }));
        assert_eq!(plan.board.snapshot()[0].status, TaskStatus::Cancelled);
        // Running -> Cancelled counts against health
        assert!(f.registry.get("a").unwrap().health_score < 0.5);
    }
}
