//! Execution Strategies
//!
//! Four ways to drive the tasks of one request. All of them share the task
//! runner, so the Pending→Running→terminal state machine, per-agent
//! semaphores, per-task timeouts and tracker updates behave identically.

mod context;
mod negotiation;
mod parallel;
mod pipeline;
mod runner;
mod sequential;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::classifier::StrategyKind;
use crate::conflict::Resolution;

pub use context::{ExecutionContext, ExecutionPlan, TaskTimeouts};
pub use negotiation::NegotiationStrategy;
pub use parallel::ParallelStrategy;
pub use pipeline::PipelineStrategy;
pub use runner::{run_task, TaskOutcome};
pub use sequential::SequentialStrategy;

/// What a strategy hands back to the coordinator
#[derive(Debug, Default)]
pub struct StrategyReport {
    /// One outcome per task, in decision order
    pub outcomes: Vec<TaskOutcome>,
    /// Set by the negotiation strategy
    pub resolution: Option<Resolution>,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> StrategyReport;
}

pub fn strategy_for_kind(kind: StrategyKind) -> Box<dyn ExecutionStrategy> {
    match kind {
        StrategyKind::Sequential => Box::new(SequentialStrategy),
        StrategyKind::Parallel => Box::new(ParallelStrategy),
        StrategyKind::Pipeline => Box::new(PipelineStrategy),
        StrategyKind::Negotiation => Box::new(NegotiationStrategy),
    }
}
