//! Task state machine
//!
//! ```text
//! Pending ──start──▶ Running ──succeed──▶ Succeeded
//!    │                  │ ────fail─────▶ Failed
//!    └──────cancel──────┴──────────────▶ Cancelled
//! ```
//!
//! Terminal states never change again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::agents::{AgentOutput, AgentResult};
use crate::error::{ConductorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// One assignment of a request to exactly one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub request_id: Uuid,
    pub request_payload: String,
    pub assigned_agent: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub score: Option<f64>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl Task {
    pub fn new(request_id: Uuid, request_payload: &str, agent_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            request_payload: request_payload.to_string(),
            assigned_agent: agent_id.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            score: None,
            latency_ms: None,
            error: None,
            started: None,
        }
    }

    fn guard(&self, allowed: &[TaskStatus], to: TaskStatus) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ConductorError::invalid_transition(self.status, to))
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.guard(&[TaskStatus::Pending], TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        Ok(())
    }

    pub fn succeed(&mut self, output: &AgentOutput, latency: Duration) -> Result<()> {
        self.guard(&[TaskStatus::Running], TaskStatus::Succeeded)?;
        self.status = TaskStatus::Succeeded;
        self.result = Some(output.payload.clone());
        self.score = Some(output.score.clamp(0.0, 1.0));
        self.finish(latency);
        Ok(())
    }

    pub fn fail(&mut self, error: &str, latency: Duration) -> Result<()> {
        self.guard(&[TaskStatus::Running], TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.finish(latency);
        Ok(())
    }

    /// Cancel from Pending or Running; returns the status it left
    pub fn cancel(&mut self, reason: &str) -> Result<TaskStatus> {
        self.guard(
            &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Cancelled,
        )?;
        let previous = self.status;
        self.status = TaskStatus::Cancelled;
        self.error = Some(reason.to_string());
        if previous == TaskStatus::Running {
            let latency = self.elapsed_since_start();
            self.finish(latency);
        } else {
            self.completed_at = Some(Utc::now());
        }
        Ok(previous)
    }

    fn finish(&mut self, latency: Duration) {
        self.completed_at = Some(Utc::now());
        self.latency_ms = Some(latency.as_millis() as u64);
    }

    /// Time since `start`, zero if never started
    pub fn elapsed_since_start(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Result view for succeeded tasks
    pub fn agent_result(&self) -> Option<AgentResult> {
        if self.status != TaskStatus::Succeeded {
            return None;
        }
        Some(AgentResult {
            agent_id: self.assigned_agent.clone(),
            payload: self.result.clone()?,
            score: self.score.unwrap_or(0.0),
            latency: Duration::from_millis(self.latency_ms.unwrap_or(0)),
        })
    }
}

/// Task id + agent, in decision order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub task_id: Uuid,
    pub agent_id: String,
}

/// A task moved to Cancelled by a sweep
#[derive(Debug, Clone)]
pub struct SweptTask {
    pub task_id: Uuid,
    pub agent_id: String,
    /// Left Running (true) or Pending (false)
    pub was_running: bool,
    pub elapsed: Duration,
}

/// Tasks of one request
pub struct TaskBoard {
    request_id: Uuid,
    order: Vec<Uuid>,
    tasks: DashMap<Uuid, Task>,
}

impl TaskBoard {
    /// One Pending task per target agent
    pub fn new(request_id: Uuid, request: &str, agents: &[String]) -> Self {
        let tasks = DashMap::new();
        let mut order = Vec::with_capacity(agents.len());
        for agent_id in agents {
            let task = Task::new(request_id, request, agent_id);
            order.push(task.id);
            tasks.insert(task.id, task);
        }
        Self {
            request_id,
            order,
            tasks,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn planned(&self) -> Vec<PlannedTask> {
        self.order
            .iter()
            .filter_map(|id| {
                self.tasks.get(id).map(|t| PlannedTask {
                    task_id: *id,
                    agent_id: t.assigned_agent.clone(),
                })
            })
            .collect()
    }

    pub fn get(&self, task_id: &Uuid) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn status(&self, task_id: &Uuid) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|t| t.status)
    }

    fn with_task<R>(&self, task_id: &Uuid, f: impl FnOnce(&mut Task) -> Result<R>) -> Result<R> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ConductorError::TaskNotFound(task_id.to_string()))?;
        let out = f(&mut task)?;
        debug!(task_id = %task_id, agent_id = %task.assigned_agent, status = %task.status, "Task transition");
        Ok(out)
    }

    pub fn start(&self, task_id: &Uuid) -> Result<()> {
        self.with_task(task_id, |t| t.start())
    }

    pub fn succeed(&self, task_id: &Uuid, output: &AgentOutput, latency: Duration) -> Result<()> {
        self.with_task(task_id, |t| t.succeed(output, latency))
    }

    pub fn fail(&self, task_id: &Uuid, error: &str, latency: Duration) -> Result<()> {
        self.with_task(task_id, |t| t.fail(error, latency))
    }

    pub fn cancel(&self, task_id: &Uuid, reason: &str) -> Result<TaskStatus> {
        self.with_task(task_id, |t| t.cancel(reason))
    }

    /// Cancel every task that is still Pending or Running
    pub fn cancel_open(&self, reason: &str) -> Vec<SweptTask> {
        let mut swept = Vec::new();
        for id in &self.order {
            if let Some(mut task) = self.tasks.get_mut(id) {
                if task.status.is_terminal() {
                    continue;
                }
                let elapsed = task.elapsed_since_start();
                if let Ok(previous) = task.cancel(reason) {
                    swept.push(SweptTask {
                        task_id: *id,
                        agent_id: task.assigned_agent.clone(),
                        was_running: previous == TaskStatus::Running,
                        elapsed,
                    });
                }
            }
        }
        swept
    }

    /// All tasks in decision order
    pub fn snapshot(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect()
    }
}
