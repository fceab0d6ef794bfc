//! Result Aggregator: folds finished tasks into one response
//!
//! Deterministic for a fixed set of finished tasks: parallel results are
//! keyed and ordered by agent id, error lists are sorted by agent id.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::task::{Task, TaskStatus};
use crate::classifier::{RoutingDecision, StrategyKind};
use crate::conflict::{Resolution, UnresolvedConflict};

/// Per-agent view of one task, returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTaskReport {
    pub task_id: Uuid,
    pub agent_id: String,
    pub status: TaskStatus,
    pub payload: Option<Value>,
    pub score: Option<f64>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl From<&Task> for AgentTaskReport {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            agent_id: task.assigned_agent.clone(),
            status: task.status,
            payload: task.result.clone(),
            score: task.score,
            latency_ms: task.latency_ms,
            error: task.error.clone(),
        }
    }
}

/// Caller-facing result of one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorResult {
    pub request_id: Uuid,
    pub success: bool,
    pub payload: Value,
    pub strategy_used: StrategyKind,
    pub routing: RoutingDecision,
    pub per_agent_results: Vec<AgentTaskReport>,
    /// Fewer tasks succeeded than were planned
    pub partial: bool,
    pub resolution: Option<Resolution>,
    pub unresolved_conflicts: Vec<UnresolvedConflict>,
    /// The overall timeout fired
    pub timed_out: bool,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

/// Aggregated payload + flags
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub success: bool,
    pub payload: Value,
    pub partial: bool,
    pub unresolved_conflicts: Vec<UnresolvedConflict>,
    pub error: Option<String>,
}

impl Aggregate {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            partial: false,
            unresolved_conflicts: Vec::new(),
            error: Some(error),
        }
    }
}

/// `tasks` must be in decision order
pub fn aggregate(
    strategy: StrategyKind,
    tasks: &[Task],
    resolution: Option<&Resolution>,
) -> Aggregate {
    let mut succeeded: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Succeeded)
        .collect();
    succeeded.sort_by(|a, b| a.assigned_agent.cmp(&b.assigned_agent));
    let partial = !succeeded.is_empty() && succeeded.len() < tasks.len();
    let errors = failure_summary(tasks);

    if tasks.is_empty() {
        return Aggregate::failed("no tasks were planned".to_string());
    }

    match strategy {
        StrategyKind::Pipeline => {
            if succeeded.len() < tasks.len() {
                let halted = tasks
                    .iter()
                    .find(|t| t.status != TaskStatus::Succeeded)
                    .map(|t| {
                        format!(
                            "pipeline halted at {}: {}",
                            t.assigned_agent,
                            t.error.as_deref().unwrap_or("did not succeed")
                        )
                    })
                    .unwrap_or_else(|| "pipeline halted".to_string());
                return Aggregate::failed(halted);
            }
            let last = tasks
                .last()
                .and_then(|t| t.result.clone())
                .unwrap_or(Value::Null);
            Aggregate {
                success: true,
                payload: last,
                partial: false,
                unresolved_conflicts: Vec::new(),
                error: None,
            }
        }
        _ if succeeded.is_empty() => {
            Aggregate::failed(errors.unwrap_or_else(|| "no task succeeded".to_string()))
        }
        StrategyKind::Sequential => Aggregate {
            success: true,
            payload: succeeded[0].result.clone().unwrap_or(Value::Null),
            partial,
            unresolved_conflicts: Vec::new(),
            error: errors,
        },
        StrategyKind::Parallel => {
            let mut merged = Map::new();
            for task in &succeeded {
                merged.insert(
                    task.assigned_agent.clone(),
                    task.result.clone().unwrap_or(Value::Null),
                );
            }
            Aggregate {
                success: true,
                payload: Value::Object(merged),
                partial,
                unresolved_conflicts: Vec::new(),
                error: errors,
            }
        }
        StrategyKind::Negotiation => match resolution {
            Some(Resolution::Unresolved { conflict }) => Aggregate {
                success: true,
                payload: json!({
                    "unresolved": true,
                    "reason": conflict.reason,
                    "options": conflict.options,
                }),
                partial,
                unresolved_conflicts: vec![conflict.clone()],
                error: errors,
            },
            Some(resolved) => Aggregate {
                success: true,
                payload: resolved.payload().cloned().unwrap_or(Value::Null),
                partial,
                unresolved_conflicts: Vec::new(),
                error: errors,
            },
            None => Aggregate {
                success: true,
                payload: succeeded[0].result.clone().unwrap_or(Value::Null),
                partial,
                unresolved_conflicts: Vec::new(),
                error: errors,
            },
        },
    }
}

/// "agent: error" for every task that did not succeed, sorted by agent
fn failure_summary(tasks: &[Task]) -> Option<String> {
    let mut failures: Vec<String> = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
        .map(|t| {
            format!(
                "{}: {}",
                t.assigned_agent,
                t.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    if failures.is_empty() {
        return None;
    }
    failures.sort();
    Some(failures.join("; "))
}
