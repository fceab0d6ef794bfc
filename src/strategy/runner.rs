//! Single-task runner shared by all strategies
//!
//! acquire agent permit -> Pending→Running -> execute under the per-task
//! timeout -> terminal transition -> tracker. Cancellation is checked while
//! waiting for a permit and while the agent runs.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{ExecutionContext, ExecutionPlan};
use crate::agents::{AgentResult, TaskInput};
use crate::coordinator::PlannedTask;
use crate::error::ConductorError;
use crate::performance::Outcome;

/// How one task ended
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(AgentResult),
    Failed { agent_id: String, error: String },
    Cancelled { agent_id: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }

    pub fn agent_id(&self) -> &str {
        match self {
            TaskOutcome::Succeeded(r) => &r.agent_id,
            TaskOutcome::Failed { agent_id, .. } | TaskOutcome::Cancelled { agent_id } => agent_id,
        }
    }

    pub fn into_result(self) -> Option<AgentResult> {
        match self {
            TaskOutcome::Succeeded(r) => Some(r),
            _ => None,
        }
    }
}

/// Cancel a task that never started; health is untouched
pub(crate) fn skip_task(
    ctx: &ExecutionContext,
    plan: &ExecutionPlan,
    task: &PlannedTask,
    reason: &str,
) -> TaskOutcome {
    match plan.board.cancel(&task.task_id, reason) {
        Ok(_) => ctx.record(&task.agent_id, Outcome::Skipped, Duration::ZERO),
        Err(e) => debug!(task_id = %task.task_id, error = %e, "Task already terminal"),
    }
    TaskOutcome::Cancelled {
        agent_id: task.agent_id.clone(),
    }
}

fn fail_unstarted(plan: &ExecutionPlan, task: &PlannedTask, error: String) -> TaskOutcome {
    // Failed is only reachable from Running
    let transition = plan
        .board
        .start(&task.task_id)
        .and_then(|_| plan.board.fail(&task.task_id, &error, Duration::ZERO));
    if let Err(e) = transition {
        warn!(task_id = %task.task_id, error = %e, "Could not mark task failed");
    }
    TaskOutcome::Failed {
        agent_id: task.agent_id.clone(),
        error,
    }
}

pub async fn run_task(
    ctx: &ExecutionContext,
    plan: &ExecutionPlan,
    task: &PlannedTask,
    input: TaskInput,
    cancel: &CancellationToken,
) -> TaskOutcome {
    let agent = match ctx.agent(&task.agent_id) {
        Ok(agent) => agent,
        Err(e) => return fail_unstarted(plan, task, e.to_string()),
    };
    let semaphore = match ctx.registry().semaphore(&task.agent_id) {
        Ok(s) => s,
        Err(e) => return fail_unstarted(plan, task, e.to_string()),
    };

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return skip_task(ctx, plan, task, "cancelled before start");
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                let error = ConductorError::AgentUnavailable {
                    agent_id: task.agent_id.clone(),
                    reason: "concurrency limiter closed".to_string(),
                };
                return fail_unstarted(plan, task, error.to_string());
            }
        },
    };

    if let Err(e) = plan.board.start(&task.task_id) {
        debug!(task_id = %task.task_id, error = %e, "Task no longer startable");
        return TaskOutcome::Cancelled {
            agent_id: task.agent_id.clone(),
        };
    }

    let timeout = ctx.task_timeout(&task.agent_id);
    let agent_cancel = cancel.child_token();
    let started = Instant::now();
    debug!(
        task_id = %task.task_id,
        agent_id = %task.agent_id,
        timeout_ms = timeout.as_millis() as u64,
        "Task started"
    );

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        r = tokio::time::timeout(timeout, agent.execute(&input, agent_cancel.clone())) => Some(r),
    };
    let latency = started.elapsed();
    drop(permit);

    match result {
        None => {
            agent_cancel.cancel();
            if let Err(e) = plan.board.cancel(&task.task_id, "cancelled while running") {
                warn!(task_id = %task.task_id, error = %e, "Cancel transition rejected");
            }
            ctx.record(&task.agent_id, Outcome::Failure, latency);
            TaskOutcome::Cancelled {
                agent_id: task.agent_id.clone(),
            }
        }
        Some(Ok(Ok(output))) => {
            if let Err(e) = plan.board.succeed(&task.task_id, &output, latency) {
                warn!(task_id = %task.task_id, error = %e, "Success transition rejected");
            }
            ctx.record(&task.agent_id, Outcome::Success, latency);
            TaskOutcome::Succeeded(AgentResult {
                agent_id: task.agent_id.clone(),
                payload: output.payload,
                score: output.score.clamp(0.0, 1.0),
                latency,
            })
        }
        Some(Ok(Err(agent_error))) => {
            let error = agent_error.to_string();
            warn!(task_id = %task.task_id, agent_id = %task.agent_id, error = %error, "Agent failed");
            if let Err(e) = plan.board.fail(&task.task_id, &error, latency) {
                warn!(task_id = %task.task_id, error = %e, "Failure transition rejected");
            }
            ctx.record(&task.agent_id, Outcome::Failure, latency);
            TaskOutcome::Failed {
                agent_id: task.agent_id.clone(),
                error,
            }
        }
        Some(Err(_elapsed)) => {
            agent_cancel.cancel();
            let error = format!("task timed out after {}ms", timeout.as_millis());
            warn!(task_id = %task.task_id, agent_id = %task.agent_id, "Agent timed out");
            if let Err(e) = plan.board.fail(&task.task_id, &error, latency) {
                warn!(task_id = %task.task_id, error = %e, "Failure transition rejected");
            }
            ctx.record(&task.agent_id, Outcome::Failure, latency);
            TaskOutcome::Failed {
                agent_id: task.agent_id.clone(),
                error,
            }
        }
    }
}
