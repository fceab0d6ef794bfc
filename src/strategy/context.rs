//! Shared execution state handed to every strategy

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::agents::{Agent, AgentResult, SessionContext, TaskInput};
use crate::conflict::{ConflictResolver, Resolution};
use crate::coordinator::config::scale_timeout;
use crate::coordinator::{PlannedTask, TaskBoard};
use crate::error::{ConductorError, Result};
use crate::performance::{Outcome, PerformanceTracker};
use crate::registry::AgentRegistry;

/// Per-task timeout policy
#[derive(Debug, Clone, Copy)]
pub struct TaskTimeouts {
    /// Derived timeout = average latency * multiplier
    pub multiplier: f64,
    /// No task timeout is ever shorter than this
    pub floor: Duration,
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            multiplier: 3.0,
            floor: Duration::from_millis(100),
        }
    }
}

/// Collaborators the strategies need; shared by all requests
pub struct ExecutionContext {
    registry: Arc<AgentRegistry>,
    agents: HashMap<String, Arc<dyn Agent>>,
    tracker: Arc<PerformanceTracker>,
    resolver: ConflictResolver,
    timeouts: TaskTimeouts,
}

impl ExecutionContext {
    pub fn new(
        registry: Arc<AgentRegistry>,
        agents: HashMap<String, Arc<dyn Agent>>,
        tracker: Arc<PerformanceTracker>,
        resolver: ConflictResolver,
        timeouts: TaskTimeouts,
    ) -> Self {
        Self {
            registry,
            agents,
            tracker,
            resolver,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &String> {
        self.agents.keys()
    }

    pub fn agent(&self, agent_id: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownAgent(agent_id.to_string()))
    }

    /// Explicit `task_timeout`, else `average_latency * multiplier`, never
    /// below the floor
    pub fn task_timeout(&self, agent_id: &str) -> Duration {
        let derived = match self.registry.get(agent_id) {
            Ok(d) => d
                .task_timeout
                .unwrap_or_else(|| scale_timeout(d.average_latency, self.timeouts.multiplier)),
            Err(_) => self.timeouts.floor,
        };
        derived.max(self.timeouts.floor)
    }

    /// Feed one terminal transition to the tracker
    pub fn record(&self, agent_id: &str, outcome: Outcome, latency: Duration) {
        if let Err(e) = self.tracker.record(agent_id, outcome, latency) {
            warn!(agent_id = %agent_id, error = %e, "Failed to record task outcome");
        }
    }

    /// Run the conflict resolver with current health scores
    pub fn resolve(&self, results: Vec<AgentResult>) -> Option<Resolution> {
        let health: HashMap<String, f64> = results
            .iter()
            .filter_map(|r| {
                self.registry
                    .get(&r.agent_id)
                    .ok()
                    .map(|d| (d.id, d.health_score))
            })
            .collect();
        self.resolver.resolve(results, &health)
    }
}

/// One request's work, ready to execute
pub struct ExecutionPlan {
    pub request_id: Uuid,
    pub request: String,
    pub context: SessionContext,
    pub board: Arc<TaskBoard>,
}

impl ExecutionPlan {
    pub fn new(request: &str, context: SessionContext, board: Arc<TaskBoard>) -> Self {
        Self {
            request_id: board.request_id(),
            request: request.to_string(),
            context,
            board,
        }
    }

    /// Tasks in decision order
    pub fn tasks(&self) -> Vec<PlannedTask> {
        self.board.planned()
    }

    pub fn input(&self, task: &PlannedTask) -> TaskInput {
        TaskInput::new(task.task_id, &self.request, self.context.clone())
    }
}
