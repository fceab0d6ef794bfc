//! Negotiation / consensus strategy
//!
//! Single pass: run all agents in parallel, then hand the successful results
//! to the conflict resolver.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::context::{ExecutionContext, ExecutionPlan};
use super::parallel::run_all;
use super::{ExecutionStrategy, StrategyReport};
use crate::classifier::StrategyKind;

pub struct NegotiationStrategy;

#[async_trait]
impl ExecutionStrategy for NegotiationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Negotiation
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> StrategyReport {
        let outcomes = run_all(ctx, plan, cancel).await;
        let results = outcomes
            .iter()
            .cloned()
            .filter_map(|o| o.into_result())
            .collect();
        let resolution = ctx.resolve(results);
        StrategyReport {
            outcomes,
            resolution,
        }
    }
}
