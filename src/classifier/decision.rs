//! Routing decision: what the classifier hands to the coordinator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::agents::traits::duration_ms;

/// Execution pattern for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Sequential,
    Parallel,
    Pipeline,
    Negotiation,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Sequential => write!(f, "sequential"),
            StrategyKind::Parallel => write!(f, "parallel"),
            StrategyKind::Pipeline => write!(f, "pipeline"),
            StrategyKind::Negotiation => write!(f, "negotiation"),
        }
    }
}

/// How the target agents of a multi-agent request relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRelation {
    /// Independent sub-tasks
    Independent,
    /// Each agent's output feeds the next
    Chained,
    /// All agents answer the same sub-question
    SameQuestion,
}

impl TargetRelation {
    pub fn strategy(self) -> StrategyKind {
        match self {
            TargetRelation::Independent => StrategyKind::Parallel,
            TargetRelation::Chained => StrategyKind::Pipeline,
            TargetRelation::SameQuestion => StrategyKind::Negotiation,
        }
    }
}

/// Which classification path produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A single lexicon tag crossed the confidence threshold
    Keyword,
    /// The language model proposed the targets
    Model,
    /// Model unavailable or unusable; best keyword match used
    KeywordFallback,
    /// Nothing matched; routed to the default agent
    DefaultAgent,
}

/// Immutable per-request routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Ordered target agents; pipeline order for `Pipeline`
    pub target_agents: Vec<String>,
    /// [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    pub strategy: StrategyKind,
    /// 1 (lowest) ..= 10 (highest)
    pub priority: u8,
    #[serde(with = "duration_ms")]
    pub estimated_duration: Duration,
    pub source: DecisionSource,
    /// Lexicon tags that matched the request, best first
    pub intents: Vec<String>,
}

impl RoutingDecision {
    pub fn is_multi_agent(&self) -> bool {
        self.target_agents.len() > 1
    }
}

/// Strategy for a target list: one agent is always sequential, otherwise the
/// relation decides
pub fn strategy_for(target_count: usize, relation: TargetRelation) -> StrategyKind {
    if target_count <= 1 {
        StrategyKind::Sequential
    } else {
        relation.strategy()
    }
}
